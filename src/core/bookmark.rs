//! The bookmark record and its canonical forms.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::tags::TagSet;
use super::xhash;

/// Bit 0 of `flags`: the record is a tombstone.
pub const FLAG_TOMBSTONE: u32 = 1;

/// A bookmark as produced by a source parse, before the store stamps it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bookmark {
    /// Canonicalized URL, the natural key within a device.
    pub url: String,
    pub title: String,
    pub desc: String,
    pub tags: TagSet,
    /// Source that produced this bookmark, e.g. `firefox@default`.
    pub module: String,
    /// Marktab action names observed at parse time. Not persisted and not
    /// part of the content hash; consumed by the hook dispatcher.
    pub actions: BTreeSet<String>,
}

impl Bookmark {
    pub fn new(url: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            url: canonical_url(&url.into()),
            module: module.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    /// Content hash over the canonical fields.
    pub fn xhsum(&self) -> String {
        xhash::xhsum(&self.url, &self.title, &self.tags, &self.desc)
    }
}

/// A bookmark row as stored: the bookmark fields plus provenance stamps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    pub url: String,
    pub title: String,
    pub desc: String,
    /// Column form `,tag1,tag2,`.
    pub tags: String,
    pub module: String,
    pub flags: u32,
    pub xhsum: String,
    /// Lamport clock value at last mutation on the writing device.
    pub version: u64,
    /// Device that last wrote this record.
    pub node_id: String,
    /// Unix seconds of last mutation.
    pub modified: i64,
}

impl BookmarkRecord {
    pub fn is_tombstone(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }

    pub fn tag_set(&self) -> TagSet {
        TagSet::from_column(&self.tags)
    }
}

/// Canonicalize a URL: scheme lowercased, everything else (trailing slash,
/// fragment, query) preserved byte for byte.
pub fn canonical_url(url: &str) -> String {
    let url = url.trim();
    match url.find("://") {
        Some(pos) if url[..pos].chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) => {
            let mut out = url[..pos].to_ascii_lowercase();
            out.push_str(&url[pos..]);
            out
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_url_lowercases_scheme_only() {
        assert_eq!(
            canonical_url("HTTPS://Example.com/Path/#Frag"),
            "https://Example.com/Path/#Frag"
        );
        assert_eq!(canonical_url("https://x/"), "https://x/");
        assert_eq!(canonical_url("no-scheme/path"), "no-scheme/path");
        assert_eq!(canonical_url("  https://x \n"), "https://x");
    }

    #[test]
    fn xhsum_excludes_module_and_actions() {
        let tags: TagSet = ["a"].into_iter().collect();
        let mut a = Bookmark::new("https://x/", "chrome@Default").with_tags(tags.clone());
        let b = Bookmark::new("https://x/", "firefox@default").with_tags(tags);
        a.actions.insert("archive".into());
        assert_eq!(a.xhsum(), b.xhsum());
    }

    #[test]
    fn tombstone_flag_round_trips() {
        let rec = BookmarkRecord {
            url: "https://x/".into(),
            title: String::new(),
            desc: String::new(),
            tags: ",".into(),
            module: String::new(),
            flags: FLAG_TOMBSTONE,
            xhsum: String::new(),
            version: 3,
            node_id: String::new(),
            modified: 0,
        };
        assert!(rec.is_tombstone());
        assert!(rec.tag_set().is_empty());
    }
}
