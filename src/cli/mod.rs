//! CLI surface: run the engine, import external collections, search.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::telemetry;
use crate::{Error, config};

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "gosuki",
    version,
    about = "Multi-browser real-time bookmark aggregator",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Machine-readable JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Database file (default: data dir).
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Errors only.
    #[arg(short = 'q', long, global = true, default_value_t = false)]
    pub quiet: bool,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch detected browsers and keep the database in sync.
    Start,

    /// Ingest an external bookmark collection.
    Import {
        #[command(subcommand)]
        cmd: ImportCmd,
    },

    /// Prefix + fuzzy search over title and URL.
    Search(SearchArgs),
}

#[derive(Subcommand, Debug)]
pub enum ImportCmd {
    /// Import a buku SQLite database.
    Buku { path: PathBuf },
    /// Import a Pocket CSV export.
    Pocket { path: PathBuf },
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Terms; `:tagA,tagB` requires all tags, `:OR tagC,tagD` any.
    #[arg(required = true, value_name = "TERMS")]
    pub query: Vec<String>,
}

/// Parse the command line, run it, and map errors to stable exit codes.
pub fn run(cli: Cli) -> i32 {
    let mut config = config::load_or_init();
    if let Some(db) = &cli.db {
        config.database.path = Some(db.clone());
    }

    let _telemetry = telemetry::init(telemetry::TelemetryConfig::new(
        cli.verbose,
        cli.quiet,
        config.logging.clone(),
    ));

    let result = match &cli.command {
        Commands::Start => commands::start::execute(&config),
        Commands::Import { cmd } => commands::import::execute(&config, cmd, cli.json),
        Commands::Search(args) => commands::search::execute(&config, args, cli.json),
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            report(&err);
            err.exit_code()
        }
    }
}

/// Structured user-visible error line: `<component>: <kind>: <message>`.
fn report(err: &Error) {
    eprintln!("{}: {}: {err}", component(err), err.kind().as_str());
}

fn component(err: &Error) -> &'static str {
    match err {
        Error::Store(_) => "store",
        Error::Source(_) => "source",
        Error::Sync(_) => "sync",
        Error::Browser(_) => "browsers",
        Error::Config(_) => "config",
        Error::Import(_) => "import",
        Error::Io(_) => "io",
    }
}
