//! XDG directory helpers for config/data locations.

use std::path::PathBuf;

/// Base directory for persistent data (database, scratch copies, logs).
///
/// Uses `GOSUKI_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/gosuki` or
/// `~/.local/share/gosuki`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GOSUKI_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("gosuki")
}

/// On-disk database path (`gosuki.db` under the data dir). Scratch copies,
/// the node id file and the event socket live next to whatever file this
/// resolves to.
pub fn db_path() -> PathBuf {
    data_dir().join("gosuki.db")
}

/// Directory for rolling log files.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Base directory for configuration files.
///
/// Uses `GOSUKI_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/gosuki` or
/// `~/.config/gosuki`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GOSUKI_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("gosuki")
}
