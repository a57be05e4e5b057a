//! Folds every source's current contribution into the global URL index.
//!
//! The merger keeps a shadow copy of each source's last contribution. A
//! reload is diffed against that shadow; only URLs whose merged view
//! actually changed produce store traffic, so steady-state reloads are
//! silent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use crate::core::{Bookmark, NodeTree, UrlIndex};

/// Ordered effect of one merge pass. Upserts and deletes are lexicographic
/// by URL.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub upserts: Vec<Bookmark>,
    pub deletes: Vec<String>,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

pub struct Merger {
    /// source id -> (url -> contribution), stable-ordered on both levels so
    /// merged fields are deterministic.
    contributions: BTreeMap<String, BTreeMap<String, Bookmark>>,
    index: Arc<RwLock<UrlIndex>>,
}

impl Merger {
    pub fn new(index: Arc<RwLock<UrlIndex>>) -> Self {
        Self {
            contributions: BTreeMap::new(),
            index,
        }
    }

    pub fn index(&self) -> &Arc<RwLock<UrlIndex>> {
        &self.index
    }

    /// Replace `source_id`'s contribution with a fresh tree and fold the
    /// difference into the global index.
    pub fn apply(&mut self, source_id: &str, tree: &NodeTree) -> MergeOutcome {
        let fresh = tree.flatten();
        let previous = self
            .contributions
            .insert(source_id.to_string(), fresh.clone())
            .unwrap_or_default();

        // every URL touched by either the old or the new contribution
        let mut touched: BTreeSet<&String> = BTreeSet::new();
        touched.extend(fresh.keys());
        touched.extend(previous.keys());

        let mut outcome = MergeOutcome::default();
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        for url in touched {
            match self.merged_view(url) {
                Some(merged) => {
                    let changed = index.get(url).is_none_or(|current| {
                        current.title != merged.title
                            || current.desc != merged.desc
                            || current.tags != merged.tags
                    });
                    if changed {
                        index.upsert(merged.clone());
                        outcome.upserts.push(merged);
                    }
                }
                None => {
                    if index.remove(url).is_some() {
                        outcome.deletes.push(url.clone());
                    }
                }
            }
        }
        outcome
    }

    /// Drop a source's contribution entirely (source shut down or removed).
    pub fn retract(&mut self, source_id: &str) -> MergeOutcome {
        self.apply(source_id, &NodeTree::new())
    }

    /// Union of all current contributions for one URL: tags and actions
    /// merge, the first non-empty title and description win in stable
    /// source order.
    fn merged_view(&self, url: &str) -> Option<Bookmark> {
        let mut merged: Option<Bookmark> = None;
        for contribution in self.contributions.values() {
            let Some(bm) = contribution.get(url) else {
                continue;
            };
            match &mut merged {
                None => merged = Some(bm.clone()),
                Some(acc) => {
                    if acc.title.is_empty() {
                        acc.title = bm.title.clone();
                    }
                    if acc.desc.is_empty() {
                        acc.desc = bm.desc.clone();
                    }
                    acc.tags.union(&bm.tags);
                    acc.actions.extend(bm.actions.iter().cloned());
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TagSet;

    fn index() -> Arc<RwLock<UrlIndex>> {
        Arc::new(RwLock::new(UrlIndex::new()))
    }

    fn tree_with(entries: &[(&str, &str, &[&str])]) -> NodeTree {
        let mut tree = NodeTree::new();
        let root = tree.root();
        for (url, title, folders) in entries {
            let mut parent = root;
            for folder in *folders {
                parent = tree.add_folder(parent, *folder);
            }
            tree.add_url(parent, Bookmark::new(*url, "test").with_title(*title));
        }
        tree
    }

    #[test]
    fn first_reload_upserts_everything() {
        let mut merger = Merger::new(index());
        let outcome = merger.apply(
            "chrome@Default",
            &tree_with(&[
                ("https://b/", "B", &["x"]),
                ("https://a/", "A", &[]),
            ]),
        );
        assert_eq!(outcome.deletes.len(), 0);
        // lexicographic by URL
        let urls: Vec<&str> = outcome.upserts.iter().map(|b| b.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a/", "https://b/"]);
        assert_eq!(merger.index().read().unwrap().len(), 2);
    }

    #[test]
    fn unchanged_reload_is_silent() {
        let mut merger = Merger::new(index());
        let tree = tree_with(&[("https://a/", "A", &["x"])]);
        merger.apply("chrome@Default", &tree);
        let outcome = merger.apply("chrome@Default", &tree);
        assert!(outcome.is_empty());
    }

    #[test]
    fn removed_url_is_deleted_when_no_other_source_has_it() {
        let mut merger = Merger::new(index());
        merger.apply(
            "chrome@Default",
            &tree_with(&[("https://a/", "A", &[]), ("https://b/", "B", &[])]),
        );
        let outcome = merger.apply("chrome@Default", &tree_with(&[("https://a/", "A", &[])]));
        assert_eq!(outcome.deletes, vec!["https://b/".to_string()]);
        assert!(!merger.index().read().unwrap().contains("https://b/"));
    }

    #[test]
    fn two_sources_union_their_tags() {
        let mut merger = Merger::new(index());
        merger.apply("chrome@Default", &tree_with(&[("https://x/", "", &["a"])]));
        let outcome = merger.apply(
            "firefox@default",
            &tree_with(&[("https://x/", "Titled", &["b"])]),
        );
        assert_eq!(outcome.upserts.len(), 1);
        let merged = &outcome.upserts[0];
        assert_eq!(merged.tags.to_column(), ",a,b,");
        assert_eq!(merged.title, "Titled");
    }

    #[test]
    fn losing_one_contributor_reunions_the_rest() {
        let mut merger = Merger::new(index());
        merger.apply("chrome@Default", &tree_with(&[("https://x/", "T", &["a"])]));
        merger.apply("firefox@default", &tree_with(&[("https://x/", "T", &["b"])]));

        // firefox drops the URL: the row stays, retagged from chrome only
        let outcome = merger.apply("firefox@default", &tree_with(&[]));
        assert!(outcome.deletes.is_empty());
        assert_eq!(outcome.upserts.len(), 1);
        assert_eq!(outcome.upserts[0].tags.to_column(), ",a,");

        // chrome drops it too: now it is a delete
        let outcome = merger.apply("chrome@Default", &tree_with(&[]));
        assert_eq!(outcome.deletes, vec!["https://x/".to_string()]);
    }

    #[test]
    fn quiescent_index_equals_union_of_contributions() {
        let mut merger = Merger::new(index());
        // interleave reloads in arbitrary order
        merger.apply("s1", &tree_with(&[("https://a/", "A", &["one"])]));
        merger.apply("s2", &tree_with(&[("https://b/", "B", &["two"])]));
        merger.apply("s1", &tree_with(&[("https://a/", "A", &["one", "extra"])]));
        merger.apply(
            "s3",
            &tree_with(&[("https://a/", "", &["three"]), ("https://c/", "C", &[])]),
        );
        merger.apply("s2", &tree_with(&[]));

        let guard = merger.index().read().unwrap();
        let urls: Vec<&str> = guard.iter().map(|(u, _)| u).collect();
        assert_eq!(urls, vec!["https://a/", "https://c/"]);
        let a: TagSet = ["one", "extra", "three"].into_iter().collect();
        assert_eq!(guard.tags("https://a/"), Some(&a));
    }

    #[test]
    fn retract_behaves_like_an_empty_reload() {
        let mut merger = Merger::new(index());
        merger.apply("s1", &tree_with(&[("https://a/", "A", &[])]));
        let outcome = merger.retract("s1");
        assert_eq!(outcome.deletes, vec!["https://a/".to_string()]);
    }
}
