//! In-memory bookmark tree, the output shape of every source parse.
//!
//! The tree is an arena: nodes live in a flat vector and refer to their
//! parent and children by index, so folders and leaves can cross-reference
//! without reference cycles.

use std::collections::BTreeMap;

use super::bookmark::Bookmark;
use super::tags;

/// Index of a node within its tree's arena.
pub type NodeRef = usize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Named folder; the root folder has an empty name.
    Folder(String),
    /// Leaf holding a parsed bookmark.
    Url(Bookmark),
}

#[derive(Clone, Debug)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeRef>,
    children: Vec<NodeRef>,
}

/// Arena bookmark tree. Purely functional output of a parse: built once per
/// reload and discarded after merging.
#[derive(Clone, Debug, Default)]
pub struct NodeTree {
    nodes: Vec<Node>,
}

impl NodeTree {
    /// A tree with a single unnamed root folder.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Folder(String::new()),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeRef {
        0
    }

    pub fn add_folder(&mut self, parent: NodeRef, name: impl Into<String>) -> NodeRef {
        self.add_node(parent, NodeKind::Folder(name.into()))
    }

    pub fn add_url(&mut self, parent: NodeRef, bookmark: Bookmark) -> NodeRef {
        self.add_node(parent, NodeKind::Url(bookmark))
    }

    fn add_node(&mut self, parent: NodeRef, kind: NodeKind) -> NodeRef {
        debug_assert!(parent < self.nodes.len(), "parent out of bounds");
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn kind(&self, node: NodeRef) -> &NodeKind {
        &self.nodes[node].kind
    }

    pub fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.nodes[node].parent
    }

    /// Folder path components from the root (exclusive) down to `node`
    /// (exclusive of the node itself when it is a leaf).
    pub fn folder_path(&self, node: NodeRef) -> Vec<&str> {
        let mut components = Vec::new();
        let mut cursor = self.nodes[node].parent;
        while let Some(idx) = cursor {
            if let NodeKind::Folder(name) = &self.nodes[idx].kind
                && !name.is_empty()
            {
                components.push(name.as_str());
            }
            cursor = self.nodes[idx].parent;
        }
        components.reverse();
        components
    }

    /// Number of URL leaves.
    pub fn url_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Url(_)))
            .count()
    }

    /// Collapse the tree into URL-keyed bookmarks.
    ///
    /// Applies the shared tag rules: folder path components become implicit
    /// tags, `#hashtag` tokens in title and description become explicit tags,
    /// `@name` tokens are recorded as marktab actions. A URL appearing under
    /// several folders collapses into a single bookmark whose tag set is the
    /// union; the first non-empty title and description win, in stable order
    /// by folder path.
    pub fn flatten(&self) -> BTreeMap<String, Bookmark> {
        let mut leaves: Vec<(Vec<&str>, &Bookmark)> = Vec::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if let NodeKind::Url(bm) = &node.kind {
                leaves.push((self.folder_path(idx), bm));
            }
        }
        leaves.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out: BTreeMap<String, Bookmark> = BTreeMap::new();
        for (path, leaf) in leaves {
            let mut tags = leaf.tags.clone();
            for component in &path {
                if let Some(tag) = tags::folder_tag(component) {
                    tags.insert(&tag);
                }
            }
            let mut extracted = tags::extract_tokens(&leaf.title);
            extracted.merge(tags::extract_tokens(&leaf.desc));
            tags.union(&extracted.tags);

            let entry = out.entry(leaf.url.clone()).or_insert_with(|| Bookmark {
                url: leaf.url.clone(),
                module: leaf.module.clone(),
                ..Default::default()
            });
            if entry.title.is_empty() {
                entry.title = leaf.title.clone();
            }
            if entry.desc.is_empty() {
                entry.desc = leaf.desc.clone();
            }
            entry.tags.union(&tags);
            entry.actions.extend(leaf.actions.iter().cloned());
            entry.actions.extend(extracted.actions);
        }
        out
    }
}
