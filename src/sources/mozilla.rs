//! Mozilla-family source: parses `places.sqlite` of one profile.
//!
//! The browser holds the database exclusively locked while running, so every
//! parse copies it to a private scratch path first and opens the copy
//! read-only. The scratch file is removed when the parse completes.

use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::{Connection, OpenFlags};

use crate::browsers::Profile;
use crate::core::{Bookmark, NodeRef, NodeTree};
use crate::daemon::scratch;

use super::{BookmarkSource, SourceError, WatchMode, WatchTarget};

const TYPE_BOOKMARK: i64 = 1;
const TYPE_FOLDER: i64 = 2;

pub struct MozillaSource {
    id: String,
    profile_dir: PathBuf,
    places: PathBuf,
    scratch_dir: PathBuf,
}

struct PlacesRow {
    id: i64,
    parent: i64,
    kind: i64,
    title: String,
    url: Option<String>,
}

impl MozillaSource {
    pub fn new(flavour: &str, profile: &Profile, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: format!("{}@{}", flavour, profile.name),
            profile_dir: profile.dir.clone(),
            places: profile.dir.join("places.sqlite"),
            scratch_dir: scratch_dir.into(),
        }
    }

    fn read_rows(&self, conn: &Connection) -> Result<Vec<PlacesRow>, SourceError> {
        let has_table: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'moz_bookmarks'",
            [],
            |row| row.get(0),
        )?;
        if has_table == 0 {
            return Err(SourceError::Schema {
                path: self.places.clone(),
                reason: "missing moz_bookmarks table".into(),
            });
        }

        let mut stmt = conn.prepare(
            "SELECT b.id, b.parent, b.type, COALESCE(b.title, ''), p.url
             FROM moz_bookmarks b
             LEFT JOIN moz_places p ON b.fk = p.id
             ORDER BY b.parent, b.position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PlacesRow {
                id: row.get(0)?,
                parent: row.get(1)?,
                kind: row.get(2)?,
                title: row.get(3)?,
                url: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn build_tree(&self, rows: Vec<PlacesRow>) -> NodeTree {
        let mut children: HashMap<i64, Vec<&PlacesRow>> = HashMap::new();
        let ids: std::collections::HashSet<i64> = rows.iter().map(|r| r.id).collect();
        for row in &rows {
            children.entry(row.parent).or_default().push(row);
        }

        let mut tree = NodeTree::new();
        let root = tree.root();
        // Roots are rows whose parent is not itself a row (the places root
        // has parent 0).
        let root_keys: Vec<i64> = children
            .keys()
            .copied()
            .filter(|parent| !ids.contains(parent))
            .collect();
        for key in root_keys {
            self.attach(&mut tree, root, key, &children);
        }
        tree
    }

    fn attach(
        &self,
        tree: &mut NodeTree,
        parent: NodeRef,
        key: i64,
        children: &HashMap<i64, Vec<&PlacesRow>>,
    ) {
        let Some(rows) = children.get(&key) else {
            return;
        };
        for row in rows {
            match row.kind {
                TYPE_FOLDER => {
                    let folder = tree.add_folder(parent, row.title.clone());
                    self.attach(tree, folder, row.id, children);
                }
                TYPE_BOOKMARK => {
                    if let Some(url) = &row.url {
                        tree.add_url(
                            parent,
                            Bookmark::new(url, &self.id).with_title(row.title.clone()),
                        );
                    }
                }
                _ => {}
            }
        }
    }
}

impl BookmarkSource for MozillaSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn init(&mut self) -> Result<(), SourceError> {
        if !self.places.is_file() {
            return Err(SourceError::Missing {
                path: self.places.clone(),
            });
        }
        Ok(())
    }

    fn watch(&self) -> WatchMode {
        WatchMode::Files(vec![WatchTarget::dir(&self.profile_dir)])
    }

    fn load(&mut self) -> Result<NodeTree, SourceError> {
        let copy = scratch::copy_to_scratch(&self.scratch_dir, &self.places)
            .map_err(|err| SourceError::io(&self.places, err))?;

        let conn = Connection::open_with_flags(
            copy.path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let rows = self.read_rows(&conn)?;
        drop(conn);

        Ok(self.build_tree(rows))
        // `copy` drops here, removing the scratch file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_places(dir: &std::path::Path) {
        let conn = Connection::open(dir.join("places.sqlite")).expect("open");
        conn.execute_batch(
            "CREATE TABLE moz_places (id INTEGER PRIMARY KEY, url TEXT);
             CREATE TABLE moz_bookmarks (
                 id INTEGER PRIMARY KEY,
                 type INTEGER,
                 fk INTEGER,
                 parent INTEGER,
                 position INTEGER,
                 title TEXT
             );
             INSERT INTO moz_places VALUES (10, 'https://example.com/');
             INSERT INTO moz_places VALUES (11, 'https://rust-lang.org/');
             -- root(1) > menu(2) > research(3)
             INSERT INTO moz_bookmarks VALUES (1, 2, NULL, 0, 0, '');
             INSERT INTO moz_bookmarks VALUES (2, 2, NULL, 1, 0, 'menu');
             INSERT INTO moz_bookmarks VALUES (3, 2, NULL, 2, 0, 'research');
             INSERT INTO moz_bookmarks VALUES (4, 1, 10, 3, 0, 'Example');
             INSERT INTO moz_bookmarks VALUES (5, 1, 11, 2, 1, 'Rust #lang');",
        )
        .expect("seed");
    }

    fn source(profile_dir: &std::path::Path, scratch: &std::path::Path) -> MozillaSource {
        let profile = Profile {
            name: "default".into(),
            dir: profile_dir.to_path_buf(),
        };
        MozillaSource::new("firefox", &profile, scratch)
    }

    #[test]
    fn parses_folder_hierarchy_from_places() {
        let dir = TempDir::new().expect("tempdir");
        let scratch = TempDir::new().expect("tempdir");
        seed_places(dir.path());

        let mut src = source(dir.path(), scratch.path());
        src.init().expect("init");
        let tree = src.load().expect("load");
        assert_eq!(tree.url_count(), 2);

        let flat = tree.flatten();
        let example = flat.get("https://example.com/").expect("example");
        assert!(example.tags.contains("menu"));
        assert!(example.tags.contains("research"));
        let rust = flat.get("https://rust-lang.org/").expect("rust");
        assert!(rust.tags.contains("lang"));
        assert_eq!(rust.module, "firefox@default");
    }

    #[test]
    fn parse_succeeds_while_db_is_held_open() {
        let dir = TempDir::new().expect("tempdir");
        let scratch = TempDir::new().expect("tempdir");
        seed_places(dir.path());

        // Simulate a running browser: hold an exclusive write transaction.
        let browser = Connection::open(dir.path().join("places.sqlite")).expect("open");
        browser
            .execute_batch("BEGIN EXCLUSIVE")
            .expect("lock places");

        let mut src = source(dir.path(), scratch.path());
        src.init().expect("init");
        let tree = src.load().expect("load under lock");
        assert_eq!(tree.url_count(), 2);

        // scratch copy must be gone after the parse
        let leftovers: Vec<_> = std::fs::read_dir(scratch.path())
            .expect("read scratch")
            .flatten()
            .collect();
        assert!(leftovers.is_empty(), "scratch not cleaned: {leftovers:?}");
    }

    #[test]
    fn missing_places_is_fatal_for_the_source() {
        let dir = TempDir::new().expect("tempdir");
        let scratch = TempDir::new().expect("tempdir");
        let mut src = source(dir.path(), scratch.path());
        let err = src.init().expect_err("missing file");
        assert!(matches!(err, SourceError::Missing { .. }));
    }

    #[test]
    fn foreign_schema_is_a_schema_error() {
        let dir = TempDir::new().expect("tempdir");
        let scratch = TempDir::new().expect("tempdir");
        let conn = Connection::open(dir.path().join("places.sqlite")).expect("open");
        conn.execute_batch("CREATE TABLE not_places (x INTEGER)")
            .expect("seed");
        drop(conn);

        let mut src = source(dir.path(), scratch.path());
        src.init().expect("init");
        let err = src.load().expect_err("schema");
        assert!(matches!(err, SourceError::Schema { .. }));
    }
}
