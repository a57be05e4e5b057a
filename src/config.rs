//! Config loading and persistence.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::browsers::BrowserDef;
use crate::daemon::hooks::HookConfig;
use crate::daemon::watcher::WatcherConfig;
use crate::{Error, Result, paths};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub watcher: WatcherSection,
    pub logging: LoggingConfig,
    pub sync: SyncConfig,
    pub hooks: HooksConfig,
    pub browsers: BrowsersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Override for the on-disk database file.
    pub path: Option<PathBuf>,
    /// Milliseconds between backups of the in-memory working set to disk.
    pub sync_interval_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            sync_interval_ms: 4_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSection {
    pub debounce_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            debounce_ms: 1_500,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directives, e.g. `info` or `info,chrome=trace`.
    pub level: String,
    /// Human-readable log lines on stderr.
    pub stdout: bool,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            stdout: true,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    /// Defaults to `<data dir>/logs`.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    /// Known peers, used for export watermarks and tombstone reaping.
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub timeout_ms: u64,
    pub max_concurrent: usize,
    /// Marktab bindings: action or tag name -> program.
    pub marktab: BTreeMap<String, String>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_concurrent: 2,
            marktab: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BrowsersConfig {
    /// Definitions appended to the built-in table at runtime.
    pub extra: Vec<BrowserDef>,
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(paths::db_path)
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_millis(self.database.sync_interval_ms.max(100))
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            debounce: Duration::from_millis(self.watcher.debounce_ms),
            backoff_base: Duration::from_millis(self.watcher.backoff_base_ms.max(1)),
            backoff_cap: Duration::from_millis(self.watcher.backoff_max_ms.max(1)),
        }
        .clamped()
    }

    pub fn hook_config(&self) -> HookConfig {
        HookConfig {
            bindings: self.hooks.marktab.clone(),
            timeout: Duration::from_millis(self.hooks.timeout_ms.max(100)),
            max_concurrent: self.hooks.max_concurrent.max(1),
        }
    }
}

pub fn config_path() -> PathBuf {
    paths::config_dir().join("config.toml")
}

pub fn load(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Load the config file, writing defaults on first run and falling back to
/// defaults (with a warning) when the file is unreadable.
pub fn load_or_init() -> Config {
    let path = config_path();
    if path.exists() {
        match load(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                tracing::warn!("config load failed, using defaults: {e}");
                return Config::default();
            }
        }
    }

    let cfg = Config::default();
    if let Err(e) = write_config(&path, &cfg) {
        tracing::warn!("failed to write default config: {e}");
    }
    cfg
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Config(format!("failed to create {}: {e}", dir.display())))?;
    }
    let contents = toml::to_string_pretty(cfg)
        .map_err(|e| Error::Config(format!("failed to render config: {e}")))?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Config("config path missing parent directory".to_string()))?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        Error::Config(format!(
            "failed to create temp file in {}: {e}",
            dir.display()
        ))
    })?;
    fs::write(temp.path(), data)
        .map_err(|e| Error::Config(format!("failed to write config temp file: {e}")))?;
    temp.persist(path).map_err(|e| {
        Error::Config(format!(
            "failed to persist config to {}: {e}",
            path.display()
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::watcher::MIN_DEBOUNCE;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let mut cfg = Config::default();
        cfg.database.sync_interval_ms = 2_000;
        cfg.watcher.debounce_ms = 800;
        cfg.logging.level = "info,chrome=trace".to_string();
        cfg.sync.peers = vec!["laptop".to_string()];
        cfg.hooks
            .marktab
            .insert("archive".to_string(), "/usr/local/bin/archive".to_string());
        cfg.browsers.extra.push(BrowserDef::qute(
            "qutebrowser-dev",
            "~/.config/qutebrowser-dev",
        ));

        write_config(&path, &cfg).expect("write config");
        let loaded = load(&path).expect("load config");
        assert_eq!(loaded.database.sync_interval_ms, 2_000);
        assert_eq!(loaded.watcher.debounce_ms, 800);
        assert_eq!(loaded.logging.level, "info,chrome=trace");
        assert_eq!(loaded.sync.peers, vec!["laptop".to_string()]);
        assert_eq!(loaded.browsers.extra.len(), 1);
        assert!(loaded.hooks.marktab.contains_key("archive"));
    }

    #[test]
    fn defaults_match_the_documented_knobs() {
        let cfg = Config::default();
        assert_eq!(cfg.backup_interval(), Duration::from_secs(4));
        let watcher = cfg.watcher_config();
        assert_eq!(watcher.debounce, Duration::from_millis(1_500));
        assert_eq!(watcher.backoff_cap, Duration::from_secs(30));
        let hooks = cfg.hook_config();
        assert_eq!(hooks.timeout, Duration::from_secs(5));
        assert_eq!(hooks.max_concurrent, 2);
    }

    #[test]
    fn tiny_debounce_is_clamped() {
        let mut cfg = Config::default();
        cfg.watcher.debounce_ms = 10;
        assert_eq!(cfg.watcher_config().debounce, MIN_DEBOUNCE);
    }

    #[test]
    fn unknown_toml_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not toml = [").expect("write");
        assert!(load(&path).is_err());
    }
}
