//! Bookmark sources: the uniform contract a browser module implements and
//! the per-family parsers behind it.

mod chrome;
mod mozilla;
mod qute;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::ErrorKind;
use crate::core::NodeTree;

pub use chrome::ChromeSource;
pub use mozilla::MozillaSource;
pub use qute::QuteSource;

/// A path a source wants watched for change events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchTarget {
    pub path: PathBuf,
    pub recursive: bool,
}

impl WatchTarget {
    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: false,
        }
    }
}

/// How reload-needed signals are produced for a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchMode {
    /// Filesystem events on the given targets. Directory-level watches so
    /// rename-based atomic replaces are still observed.
    Files(Vec<WatchTarget>),
    /// Periodic polling, for sources with no local file to watch.
    Poll(Duration),
}

/// Uniform contract any browser module implements.
///
/// `load` is purely functional: it parses the current on-disk state into a
/// fresh tree and owns no state across reloads.
pub trait BookmarkSource: Send {
    /// Module identifier, e.g. `firefox@default`.
    fn id(&self) -> &str;

    /// Locate files and claim resources. Called once before the first load.
    fn init(&mut self) -> Result<(), SourceError>;

    /// Declare how reload-needed signals are produced for this source.
    fn watch(&self) -> WatchMode;

    /// Parse the current on-disk state into a node tree.
    fn load(&mut self) -> Result<NodeTree, SourceError>;

    /// Release all handles.
    fn shutdown(&mut self) {}
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// The underlying file is locked by the running browser.
    #[error("{}: locked by another process", path.display())]
    Locked { path: PathBuf },

    /// A read caught the file mid-write (truncated JSON tail, short read).
    #[error("{}: partial write: {reason}", path.display())]
    PartialWrite { path: PathBuf, reason: String },

    /// The file vanished after init.
    #[error("{}: missing", path.display())]
    Missing { path: PathBuf },

    #[error("{}: permission denied", path.display())]
    Permission { path: PathBuf },

    /// The store's structure is not what this parser understands.
    #[error("{}: malformed schema: {reason}", path.display())]
    Schema { path: PathBuf, reason: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl SourceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => SourceError::Missing { path },
            std::io::ErrorKind::PermissionDenied => SourceError::Permission { path },
            _ => SourceError::Io { path, source },
        }
    }

    /// Transient errors go through the watcher's backoff path; the rest
    /// park the source as failed.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Locked { .. } | SourceError::PartialWrite { .. } => ErrorKind::Transient,
            SourceError::Sqlite(err) if is_busy(err) => ErrorKind::Transient,
            SourceError::Io { .. } => ErrorKind::Transient,
            SourceError::Missing { .. }
            | SourceError::Permission { .. }
            | SourceError::Schema { .. } => ErrorKind::Recoverable,
            SourceError::Sqlite(_) => ErrorKind::Recoverable,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}
