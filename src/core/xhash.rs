//! Content hashing and fuzzy matching.
//!
//! The content hash is a 64-bit xxHash over the canonical concatenation of a
//! bookmark's fields, rendered as a decimal string. The same function backs
//! the `xhash()` SQL scalar so rows written through the compatibility
//! triggers hash identically to native upserts.

use xxhash_rust::xxh64::xxh64;

use super::tags::TagSet;

/// Hash an arbitrary string, decimal-rendered.
pub fn xhash(input: &str) -> String {
    xxh64(input.as_bytes(), 0).to_string()
}

/// Canonical hash input for a bookmark: `url+title+tags+desc` with tags
/// stable-sorted and comma-joined.
pub fn xhsum_input(url: &str, title: &str, tags: &TagSet, desc: &str) -> String {
    format!("{}+{}+{}+{}", url, title, tags.join_comma(), desc)
}

/// Content hash of a bookmark's canonical fields.
pub fn xhsum(url: &str, title: &str, tags: &TagSet, desc: &str) -> String {
    xhash(&xhsum_input(url, title, tags, desc))
}

/// Content hash from raw column values (tags in `,a,b,` column form).
pub fn xhsum_fields(url: &str, title: &str, tags_column: &str, desc: &str) -> String {
    let tags = TagSet::from_column(tags_column);
    xhsum(url, title, &tags, desc)
}

/// Case-folded fuzzy match: `pattern` must appear in `text` as a
/// subsequence. Backs the `fuzzy()` SQL scalar used by search.
pub fn fuzzy_match_fold(pattern: &str, text: &str) -> bool {
    let mut chars = text.chars().flat_map(char::to_lowercase);
    pattern
        .chars()
        .flat_map(char::to_lowercase)
        .all(|p| chars.any(|t| t == p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_across_runs() {
        // pinned value: changing the canonicalization breaks sync peers
        assert_eq!(xhash(""), xxh64(b"", 0).to_string());
        assert_eq!(xhash("gosuki"), xhash("gosuki"));
        assert_ne!(xhash("gosuki"), xhash("gosuki "));
    }

    #[test]
    fn xhsum_depends_on_every_field() {
        let tags: TagSet = ["b", "a"].into_iter().collect();
        let base = xhsum("https://x/", "t", &tags, "d");
        assert_ne!(base, xhsum("https://x/2", "t", &tags, "d"));
        assert_ne!(base, xhsum("https://x/", "t2", &tags, "d"));
        assert_ne!(base, xhsum("https://x/", "t", &TagSet::default(), "d"));
        assert_ne!(base, xhsum("https://x/", "t", &tags, "d2"));
    }

    #[test]
    fn xhsum_ignores_tag_insertion_order() {
        let ab: TagSet = ["a", "b"].into_iter().collect();
        let ba: TagSet = ["b", "a"].into_iter().collect();
        assert_eq!(xhsum("u", "t", &ab, ""), xhsum("u", "t", &ba, ""));
    }

    #[test]
    fn xhsum_fields_matches_native_form() {
        let tags: TagSet = ["research", "world"].into_iter().collect();
        assert_eq!(
            xhsum("https://example.com", "Hello #world", &tags, ""),
            xhsum_fields("https://example.com", "Hello #world", ",research,world,", "")
        );
    }

    #[test]
    fn fuzzy_is_case_folded_subsequence() {
        assert!(fuzzy_match_fold("gsk", "GoSuKi"));
        assert!(fuzzy_match_fold("", "anything"));
        assert!(fuzzy_match_fold("hello", "hello"));
        assert!(!fuzzy_match_fold("hello", "helo"));
        assert!(!fuzzy_match_fold("abc", "cba"));
    }
}
