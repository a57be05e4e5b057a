//! Chrome-family source: parses the JSON `Bookmarks` file of one profile.

use std::fs;
use std::path::PathBuf;

use serde_json::Value;

use crate::browsers::Profile;
use crate::core::{Bookmark, NodeRef, NodeTree};

use super::{BookmarkSource, SourceError, WatchMode, WatchTarget};

pub struct ChromeSource {
    id: String,
    profile_dir: PathBuf,
    bookmarks_file: PathBuf,
}

impl ChromeSource {
    pub fn new(flavour: &str, profile: &Profile) -> Self {
        Self {
            id: format!("{}@{}", flavour, profile.name),
            profile_dir: profile.dir.clone(),
            bookmarks_file: profile.dir.join("Bookmarks"),
        }
    }
}

impl BookmarkSource for ChromeSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn init(&mut self) -> Result<(), SourceError> {
        if !self.bookmarks_file.is_file() {
            return Err(SourceError::Missing {
                path: self.bookmarks_file.clone(),
            });
        }
        Ok(())
    }

    fn watch(&self) -> WatchMode {
        // Chrome replaces the file via rename(Bookmarks.tmp, Bookmarks), so
        // watch the profile directory rather than the file itself.
        WatchMode::Files(vec![WatchTarget::dir(&self.profile_dir)])
    }

    fn load(&mut self) -> Result<NodeTree, SourceError> {
        let raw = fs::read_to_string(&self.bookmarks_file)
            .map_err(|err| SourceError::io(&self.bookmarks_file, err))?;

        // A truncated tail means Chrome is mid-write; retry after backoff.
        let doc: Value =
            serde_json::from_str(&raw).map_err(|err| SourceError::PartialWrite {
                path: self.bookmarks_file.clone(),
                reason: err.to_string(),
            })?;

        let roots = doc
            .get("roots")
            .and_then(Value::as_object)
            .ok_or_else(|| SourceError::Schema {
                path: self.bookmarks_file.clone(),
                reason: "missing roots object".into(),
            })?;

        let mut tree = NodeTree::new();
        let root_ref = tree.root();
        for root in roots.values() {
            if root.is_object() {
                self.walk(&mut tree, root_ref, root);
            }
        }
        Ok(tree)
    }
}

impl ChromeSource {
    fn walk(&self, tree: &mut NodeTree, parent: NodeRef, node: &Value) {
        let name = node.get("name").and_then(Value::as_str).unwrap_or_default();
        match node.get("type").and_then(Value::as_str) {
            Some("folder") => {
                let folder = tree.add_folder(parent, name);
                if let Some(children) = node.get("children").and_then(Value::as_array) {
                    for child in children {
                        self.walk(tree, folder, child);
                    }
                }
            }
            Some("url") => {
                if let Some(url) = node.get("url").and_then(Value::as_str) {
                    tree.add_url(parent, Bookmark::new(url, &self.id).with_title(name));
                }
            }
            _ => {}
        }
    }
}
