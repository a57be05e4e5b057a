//! Tag normalization and hashtag extraction, shared by every source.
//!
//! Tags are lowercase tokens of `[a-z0-9_-]`. Folder path components become
//! implicit tags; `#token` in a title or description becomes an explicit tag;
//! `@name` in a tag position names a marktab action (recorded, not executed).

use std::collections::BTreeSet;
use std::fmt;

/// Canonical column form delimiter: tags are stored as `,tag1,tag2,`.
const TAG_DELIM: char = ',';

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Normalize a raw tag: lowercase, whitespace folded to `-`, disallowed
/// characters dropped. Returns `None` when nothing survives.
fn normalize(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_whitespace() {
            out.push('-');
        } else {
            for lc in c.to_lowercase() {
                if is_token_char(lc) {
                    out.push(lc);
                }
            }
        }
    }
    if out.is_empty() || out.chars().all(|c| c == '-') {
        None
    } else {
        Some(out)
    }
}

/// A stable-sorted, deduplicated set of normalized tags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: BTreeSet<String>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw tag, normalizing it first. Returns false when the tag
    /// normalizes to nothing.
    pub fn insert(&mut self, raw: &str) -> bool {
        match normalize(raw) {
            Some(tag) => {
                self.tags.insert(tag);
                true
            }
            None => false,
        }
    }

    pub fn union(&mut self, other: &TagSet) {
        for tag in &other.tags {
            self.tags.insert(tag.clone());
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Sorted, comma-joined, no outer delimiters: the hashing form.
    pub fn join_comma(&self) -> String {
        self.tags.iter().cloned().collect::<Vec<_>>().join(",")
    }

    /// Storage column form `,tag1,tag2,`; the empty set renders as `,`.
    pub fn to_column(&self) -> String {
        if self.tags.is_empty() {
            return TAG_DELIM.to_string();
        }
        let mut out = String::new();
        for tag in &self.tags {
            out.push(TAG_DELIM);
            out.push_str(tag);
        }
        out.push(TAG_DELIM);
        out
    }

    /// Parse the storage column form back into a set.
    pub fn from_column(column: &str) -> Self {
        let mut set = TagSet::new();
        for part in column.split(TAG_DELIM) {
            if !part.is_empty() {
                set.insert(part);
            }
        }
        set
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_column())
    }
}

impl<'a> FromIterator<&'a str> for TagSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for raw in iter {
            set.insert(raw);
        }
        set
    }
}

/// Hashtags and marktab actions pulled out of free text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedTags {
    pub tags: TagSet,
    pub actions: BTreeSet<String>,
}

impl ExtractedTags {
    pub fn merge(&mut self, other: ExtractedTags) {
        self.tags.union(&other.tags);
        self.actions.extend(other.actions);
    }
}

/// Scan text for `#tag` and `@action` tokens.
pub fn extract_tokens(text: &str) -> ExtractedTags {
    let mut out = ExtractedTags::default();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '#' && c != '@' {
            continue;
        }
        let start = i + c.len_utf8();
        let mut end = start;
        while let Some(&(j, n)) = chars.peek() {
            if is_token_char(n) {
                end = j + n.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        if end == start {
            continue;
        }
        let token = &text[start..end];
        if c == '#' {
            out.tags.insert(token);
        } else {
            out.actions.insert(token.to_ascii_lowercase());
        }
    }
    out
}

/// Implicit tag for a folder path component.
pub fn folder_tag(component: &str) -> Option<String> {
    normalize(component)
}
