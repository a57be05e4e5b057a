#![forbid(unsafe_code)]

pub mod browsers;
pub mod cli;
pub mod config;
pub mod core;
pub mod daemon;
pub mod error;
pub mod paths;
pub mod sources;
pub mod telemetry;

pub use error::{Error, ErrorKind};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    Bookmark, BookmarkRecord, ExtractedTags, FLAG_TOMBSTONE, LamportClock, NodeId, NodeTree,
    TagSet, UrlIndex, canonical_url, xhash, xhsum,
};
