use std::io;

use thiserror::Error;

use crate::browsers::BrowserError;
use crate::daemon::store::StoreError;
use crate::daemon::sync::SyncError;
use crate::sources::SourceError;

/// Blast radius of an error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Retry with backoff may succeed (locked file, partial write, SQLite busy).
    Transient,
    /// Confined to a single source; the rest of the engine keeps running.
    Recoverable,
    /// The process must shut down cleanly.
    Fatal,
    /// Bad input to the CLI or an importer.
    User,
}

impl ErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Recoverable => "recoverable",
            ErrorKind::Fatal => "fatal",
            ErrorKind::User => "user",
        }
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over per-subsystem errors; each inner error knows its own
/// blast radius.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("config: {0}")]
    Config(String),

    #[error("import: {0}")]
    Import(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Store(e) => e.kind(),
            Error::Source(e) => e.kind(),
            Error::Sync(e) => e.kind(),
            Error::Browser(_) => ErrorKind::Recoverable,
            Error::Config(_) => ErrorKind::User,
            Error::Import(_) => ErrorKind::User,
            Error::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => ErrorKind::Fatal,
            Error::Io(_) => ErrorKind::Recoverable,
        }
    }

    /// Stable process exit code for the `start` command.
    ///
    /// 0 clean shutdown, 1 config/user error, 2 database locked by a foreign
    /// writer, 3 missing permissions.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Store(StoreError::ForeignWriter { .. }) => 2,
            Error::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => 3,
            Error::Store(StoreError::Io { source, .. })
                if source.kind() == io::ErrorKind::PermissionDenied =>
            {
                3
            }
            _ => 1,
        }
    }
}
