//! The URL index: the in-process L1 cache over all sources' contributions.

use std::collections::BTreeMap;

use super::bookmark::{Bookmark, BookmarkRecord};
use super::tags::TagSet;

/// Ordered map from canonical URL to the merged bookmark.
///
/// Shared behind a reader-writer lock: the merger is the single writer,
/// search and export read concurrently. Iteration order is stable
/// (lexicographic by URL) so diffing is deterministic.
#[derive(Debug, Default)]
pub struct UrlIndex {
    inner: BTreeMap<String, Bookmark>,
}

impl UrlIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a store scan at startup. Tombstones are not indexed.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = BookmarkRecord>,
    {
        let mut index = Self::new();
        for rec in records {
            if rec.is_tombstone() {
                continue;
            }
            let tags = rec.tag_set();
            index.inner.insert(
                rec.url.clone(),
                Bookmark {
                    url: rec.url,
                    title: rec.title,
                    desc: rec.desc,
                    tags,
                    module: rec.module,
                    actions: Default::default(),
                },
            );
        }
        index
    }

    pub fn get(&self, url: &str) -> Option<&Bookmark> {
        self.inner.get(url)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.inner.contains_key(url)
    }

    pub fn upsert(&mut self, bookmark: Bookmark) {
        self.inner.insert(bookmark.url.clone(), bookmark);
    }

    pub fn remove(&mut self, url: &str) -> Option<Bookmark> {
        self.inner.remove(url)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate in lexicographic URL order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bookmark)> {
        self.inner.iter().map(|(url, bm)| (url.as_str(), bm))
    }

    /// Tags of an indexed URL, if present.
    pub fn tags(&self, url: &str) -> Option<&TagSet> {
        self.inner.get(url).map(|bm| &bm.tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FLAG_TOMBSTONE;

    fn record(url: &str, tags: &str, flags: u32) -> BookmarkRecord {
        BookmarkRecord {
            url: url.into(),
            title: "t".into(),
            desc: String::new(),
            tags: tags.into(),
            module: "test".into(),
            flags,
            xhsum: "0".into(),
            version: 1,
            node_id: "n".into(),
            modified: 0,
        }
    }

    #[test]
    fn rebuild_skips_tombstones() {
        let index = UrlIndex::from_records(vec![
            record("https://a/", ",x,", 0),
            record("https://b/", ",", FLAG_TOMBSTONE),
        ]);
        assert_eq!(index.len(), 1);
        assert!(index.contains("https://a/"));
        assert!(!index.contains("https://b/"));
    }

    #[test]
    fn iteration_is_url_ordered() {
        let mut index = UrlIndex::new();
        index.upsert(Bookmark::new("https://b/", "m"));
        index.upsert(Bookmark::new("https://a/", "m"));
        let urls: Vec<&str> = index.iter().map(|(u, _)| u).collect();
        assert_eq!(urls, vec!["https://a/", "https://b/"]);
    }
}
