//! Domain model: bookmarks, tags, trees, the URL index, the logical clock
//! and the content hash.

mod bookmark;
mod clock;
mod identity;
mod index;
mod tags;
mod tree;
mod xhash;

pub use bookmark::{Bookmark, BookmarkRecord, FLAG_TOMBSTONE, canonical_url};
pub use clock::LamportClock;
pub use identity::NodeId;
pub use index::UrlIndex;
pub use tags::{ExtractedTags, TagSet, extract_tokens, folder_tag};
pub use tree::{NodeKind, NodeRef, NodeTree};
pub use xhash::{fuzzy_match_fold, xhash, xhsum, xhsum_fields};
