//! Qute-family source: plain-text `quickmarks` and `bookmarks/urls`.
//!
//! quickmarks lines are `<name...> <url>` (URL last); bookmark lines are
//! `<url> <title...>` (URL first). Blank lines and `#` comments are skipped.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::browsers::Profile;
use crate::core::{Bookmark, NodeTree};

use super::{BookmarkSource, SourceError, WatchMode, WatchTarget};

pub struct QuteSource {
    id: String,
    base_dir: PathBuf,
    quickmarks: PathBuf,
    bookmarks: PathBuf,
}

impl QuteSource {
    pub fn new(flavour: &str, profile: &Profile) -> Self {
        Self {
            id: format!("{}@{}", flavour, profile.name),
            base_dir: profile.dir.clone(),
            quickmarks: profile.dir.join("quickmarks"),
            bookmarks: profile.dir.join("bookmarks").join("urls"),
        }
    }

    fn read_optional(&self, path: &PathBuf) -> Result<Option<String>, SourceError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SourceError::io(path, err)),
        }
    }
}

impl BookmarkSource for QuteSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn init(&mut self) -> Result<(), SourceError> {
        // Either file alone is enough; qutebrowser creates them lazily.
        if !self.quickmarks.is_file() && !self.bookmarks.is_file() {
            return Err(SourceError::Missing {
                path: self.quickmarks.clone(),
            });
        }
        Ok(())
    }

    fn watch(&self) -> WatchMode {
        WatchMode::Files(vec![
            WatchTarget::dir(&self.base_dir),
            WatchTarget::dir(self.base_dir.join("bookmarks")),
        ])
    }

    fn load(&mut self) -> Result<NodeTree, SourceError> {
        let mut tree = NodeTree::new();
        let root = tree.root();

        if let Some(contents) = self.read_optional(&self.quickmarks)? {
            let folder = tree.add_folder(root, "quickmarks");
            for line in lines(&contents) {
                // name can contain spaces; the URL is the final token
                if let Some((name, url)) = line.rsplit_once(char::is_whitespace) {
                    tree.add_url(folder, Bookmark::new(url, &self.id).with_title(name.trim()));
                } else {
                    tree.add_url(folder, Bookmark::new(line, &self.id));
                }
            }
        }

        if let Some(contents) = self.read_optional(&self.bookmarks)? {
            for line in lines(&contents) {
                match line.split_once(char::is_whitespace) {
                    Some((url, title)) => {
                        tree.add_url(root, Bookmark::new(url, &self.id).with_title(title.trim()));
                    }
                    None => {
                        tree.add_url(root, Bookmark::new(line, &self.id));
                    }
                }
            }
        }

        Ok(tree)
    }
}

fn lines(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profile(dir: &TempDir) -> Profile {
        Profile {
            name: "default".into(),
            dir: dir.path().to_path_buf(),
        }
    }

    #[test]
    fn parses_quickmarks_and_urls() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(
            dir.path().join("quickmarks"),
            "rust docs https://doc.rust-lang.org/\nwiki https://wikipedia.org/\n",
        )
        .expect("write");
        fs::create_dir(dir.path().join("bookmarks")).expect("mkdir");
        fs::write(
            dir.path().join("bookmarks").join("urls"),
            "# comment\nhttps://example.com/ Example site\nhttps://bare.example/\n",
        )
        .expect("write");

        let mut src = QuteSource::new("qutebrowser", &profile(&dir));
        src.init().expect("init");
        let flat = src.load().expect("load").flatten();

        assert_eq!(flat.len(), 4);
        let docs = flat.get("https://doc.rust-lang.org/").expect("quickmark");
        assert_eq!(docs.title, "rust docs");
        assert!(docs.tags.contains("quickmarks"));
        assert_eq!(
            flat.get("https://example.com/").expect("bookmark").title,
            "Example site"
        );
        assert!(flat.contains_key("https://bare.example/"));
    }

    #[test]
    fn missing_both_files_fails_init() {
        let dir = TempDir::new().expect("tempdir");
        let mut src = QuteSource::new("qutebrowser", &profile(&dir));
        assert!(matches!(
            src.init(),
            Err(SourceError::Missing { .. })
        ));
    }

    #[test]
    fn quickmarks_alone_is_enough() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("quickmarks"), "q https://q.example/\n").expect("write");
        let mut src = QuteSource::new("qutebrowser", &profile(&dir));
        src.init().expect("init");
        assert_eq!(src.load().expect("load").url_count(), 1);
    }
}
