//! Logging setup: per-subsystem filters, stderr output, optional rolling
//! file logs under the data dir.
//!
//! Filter directives use the standard `target=level` grammar, so a config
//! value like `info,chrome=trace` raises one subsystem without touching the
//! rest. The `GOSUKI_LOG` environment variable overrides the config.

use std::fs;
use std::path::PathBuf;

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::paths;

const LOG_FILE_PREFIX: &str = "gosuki.log";

#[derive(Clone)]
pub struct TelemetryConfig {
    /// `-v` count from the CLI; overrides the config level when nonzero.
    pub verbosity: u8,
    /// `-q`: errors only.
    pub quiet: bool,
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    pub fn new(verbosity: u8, quiet: bool, logging: LoggingConfig) -> Self {
        Self {
            verbosity,
            quiet,
            logging,
        }
    }

    fn directives(&self) -> String {
        if let Ok(env) = std::env::var("GOSUKI_LOG")
            && !env.trim().is_empty()
        {
            return env;
        }
        if self.quiet {
            return "error".to_string();
        }
        match self.verbosity {
            0 if !self.logging.level.trim().is_empty() => self.logging.level.clone(),
            0 => "info".to_string(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    }
}

pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let filter = EnvFilter::builder().parse_lossy(config.directives());

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.logging.stdout {
        layers.push(Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true),
        ));
    }

    if config.logging.file.enabled {
        let dir = resolve_log_dir(&config.logging);
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::RollingFileAppender::new(
                    tracing_appender::rolling::Rotation::DAILY,
                    &dir,
                    LOG_FILE_PREFIX,
                );
                let (writer, guard) = tracing_appender::non_blocking(appender);
                layers.push(Box::new(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_ansi(false)
                        .with_writer(writer)
                        .with_target(true),
                ));
                guards.push(guard);
            }
            Err(err) => {
                eprintln!("gosuki: log dir init failed for {}: {err}", dir.display());
            }
        }
    }

    layers.push(Box::new(filter));

    Registry::default().with(layers).init();

    TelemetryGuard { _guards: guards }
}

fn resolve_log_dir(config: &LoggingConfig) -> PathBuf {
    config.file.dir.clone().unwrap_or_else(paths::log_dir)
}
