//! `gosuki import`: one-shot ingestion of external collections.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{Connection, OpenFlags};

use crate::cli::ImportCmd;
use crate::config::Config;
use crate::core::{Bookmark, LamportClock, NodeId, TagSet};
use crate::daemon::Store;
use crate::{Error, Result};

pub fn execute(config: &Config, cmd: &ImportCmd, json: bool) -> Result<()> {
    let db_path = config.db_path();
    let data_root = db_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(crate::paths::data_dir);
    let node_id = NodeId::load_or_create(&data_root.join("node_id"))?;
    let store = Store::open_direct(&db_path, Arc::new(LamportClock::new()), node_id)?;

    let imported = match cmd {
        ImportCmd::Buku { path } => import_buku(&store, path)?,
        ImportCmd::Pocket { path } => import_pocket(&store, path)?,
    };

    if json {
        println!("{}", serde_json::json!({ "imported": imported }));
    } else {
        println!("imported {imported} bookmarks");
    }
    Ok(())
}

/// Read a buku database's `bookmarks` table; buku already stores tags in
/// the `,a,b,` column form.
fn import_buku(store: &Store, path: &Path) -> Result<usize> {
    if !path.is_file() {
        return Err(Error::Import(format!("{}: no such file", path.display())));
    }
    let source = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::Import(format!("{}: {e}", path.display())))?;

    let mut stmt = source
        .prepare(
            "SELECT URL, COALESCE(metadata, ''), COALESCE(tags, ','), COALESCE(desc, '')
             FROM bookmarks",
        )
        .map_err(|e| Error::Import(format!("{}: not a buku database: {e}", path.display())))?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(|e| Error::Import(e.to_string()))?;

    let mut imported = 0;
    for row in rows {
        let (url, title, tags, desc) = row.map_err(|e| Error::Import(e.to_string()))?;
        let bm = Bookmark::new(url, "buku")
            .with_title(title)
            .with_desc(desc)
            .with_tags(TagSet::from_column(&tags));
        store.upsert(&bm).map_err(Error::Store)?;
        imported += 1;
    }
    store.backup_to_disk().map_err(Error::Store)?;
    Ok(imported)
}

/// Pocket CSV export: `title,url,time_added,tags,status`, tags separated
/// by `|`.
fn import_pocket(store: &Store, path: &Path) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::Import(format!("{}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| Error::Import(e.to_string()))?
        .clone();
    let col = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let (Some(title_col), Some(url_col)) = (col("title"), col("url")) else {
        return Err(Error::Import(format!(
            "{}: not a Pocket export (missing title/url columns)",
            path.display()
        )));
    };
    let tags_col = col("tags");

    let mut imported = 0;
    for record in reader.records() {
        let record = record.map_err(|e| Error::Import(e.to_string()))?;
        let Some(url) = record.get(url_col).filter(|u| !u.trim().is_empty()) else {
            continue;
        };
        let mut tags = TagSet::new();
        if let Some(raw) = tags_col.and_then(|i| record.get(i)) {
            for tag in raw.split('|') {
                tags.insert(tag);
            }
        }
        let bm = Bookmark::new(url.trim(), "pocket")
            .with_title(record.get(title_col).unwrap_or_default().trim())
            .with_tags(tags);
        store.upsert(&bm).map_err(Error::Store)?;
        imported += 1;
    }
    store.backup_to_disk().map_err(Error::Store)?;
    Ok(imported)
}
