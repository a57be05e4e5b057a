//! `gosuki search`: query the on-disk database read-only.

use std::sync::Arc;

use crate::cli::SearchArgs;
use crate::config::Config;
use crate::core::{LamportClock, NodeId};
use crate::daemon::{SearchQuery, Store};
use crate::{Error, Result};

pub fn execute(config: &Config, args: &SearchArgs, json: bool) -> Result<()> {
    let store = Store::open_read_only(
        config.db_path(),
        Arc::new(LamportClock::new()),
        NodeId::generate(),
    )
    .map_err(Error::Store)?;

    let query = SearchQuery::parse(&args.query);
    let hits = store.search(&query).map_err(Error::Store)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits).unwrap_or_default());
        return Ok(());
    }

    for hit in &hits {
        let tags = hit.tag_set().join_comma();
        if tags.is_empty() {
            println!("{}\t{}", hit.url, hit.title);
        } else {
            println!("{}\t{}\t[{}]", hit.url, hit.title, tags);
        }
    }
    if hits.is_empty() {
        eprintln!("no matches");
    }
    Ok(())
}
