//! SQLite store: the durable L2 cache and the buku compatibility surface.
//!
//! The engine works against an in-memory database and periodically backs it
//! up to the on-disk file with SQLite's online backup API, so a crash leaves
//! the disk file at its previous consistent state. The `xhash`, `tick_clock`,
//! `fuzzy` and `node_id` scalar functions are part of the schema contract:
//! they are registered on every connection so the compatibility triggers can
//! stamp rows transactionally.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags, OptionalExtension, backup::Backup, params};
use thiserror::Error;

use crate::ErrorKind;
use crate::core::{
    Bookmark, BookmarkRecord, LamportClock, NodeId, fuzzy_match_fold, xhash,
};

/// Highest schema version this build understands.
pub const SCHEMA_VERSION: u32 = 2;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_millis(250);
const BACKUP_PAGES_PER_STEP: std::os::raw::c_int = 64;

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        "CREATE TABLE gskbookmarks (
             url      TEXT PRIMARY KEY NOT NULL,
             metadata TEXT NOT NULL DEFAULT '',
             tags     TEXT NOT NULL DEFAULT ',',
             desc     TEXT NOT NULL DEFAULT '',
             modified INTEGER NOT NULL DEFAULT (strftime('%s','now')),
             flags    INTEGER NOT NULL DEFAULT 0,
             module   TEXT NOT NULL DEFAULT '',
             xhsum    TEXT NOT NULL DEFAULT '',
             version  INTEGER NOT NULL DEFAULT 0,
             node_id  TEXT NOT NULL DEFAULT ''
         );
         CREATE INDEX gskbookmarks_by_version ON gskbookmarks (version);

         CREATE VIEW bookmarks AS
             SELECT rowid AS id, url AS URL, metadata, tags, desc, flags
             FROM gskbookmarks;

         CREATE TRIGGER bookmarks_insert INSTEAD OF INSERT ON bookmarks
         BEGIN
             INSERT INTO gskbookmarks
                 (url, metadata, tags, desc, flags, module, xhsum, version, node_id)
             VALUES (
                 NEW.URL,
                 COALESCE(NEW.metadata, ''),
                 COALESCE(NEW.tags, ','),
                 COALESCE(NEW.desc, ''),
                 COALESCE(NEW.flags, 0),
                 'buku',
                 xhash(NEW.URL || '+' || COALESCE(NEW.metadata, '') || '+'
                       || trim(COALESCE(NEW.tags, ','), ',') || '+'
                       || COALESCE(NEW.desc, '')),
                 tick_clock(0),
                 node_id()
             );
         END;

         CREATE TRIGGER bookmarks_update INSTEAD OF UPDATE ON bookmarks
         BEGIN
             UPDATE gskbookmarks SET
                 metadata = COALESCE(NEW.metadata, metadata),
                 tags     = COALESCE(NEW.tags, tags),
                 desc     = COALESCE(NEW.desc, desc),
                 flags    = COALESCE(NEW.flags, flags),
                 xhsum    = xhash(url || '+' || COALESCE(NEW.metadata, metadata) || '+'
                                  || trim(COALESCE(NEW.tags, tags), ',') || '+'
                                  || COALESCE(NEW.desc, desc)),
                 version  = tick_clock(version),
                 modified = strftime('%s','now')
             WHERE url = OLD.URL;
         END;",
    ),
    (
        2,
        "CREATE TABLE gskpeers (
             peer      TEXT PRIMARY KEY NOT NULL,
             watermark INTEGER NOT NULL DEFAULT 0
         );",
    ),
];

const UPSERT_SQL: &str = "\
    INSERT INTO gskbookmarks
        (url, metadata, tags, desc, modified, flags, module, xhsum, version, node_id)
    VALUES (
        ?1, ?2, ?3, ?4, strftime('%s','now'), 0, ?5,
        xhash(?1 || '+' || ?2 || '+' || trim(?3, ',') || '+' || ?4),
        tick_clock(0),
        node_id()
    )
    ON CONFLICT(url) DO UPDATE SET
        metadata = CASE WHEN excluded.metadata = '' THEN metadata ELSE excluded.metadata END,
        desc     = CASE WHEN excluded.desc = '' THEN desc ELSE excluded.desc END,
        tags     = excluded.tags,
        module   = excluded.module,
        flags    = 0,
        modified = excluded.modified,
        xhsum    = xhash(excluded.url || '+'
                         || (CASE WHEN excluded.metadata = '' THEN metadata
                                  ELSE excluded.metadata END) || '+'
                         || trim(excluded.tags, ',') || '+'
                         || (CASE WHEN excluded.desc = '' THEN desc
                                  ELSE excluded.desc END)),
        version  = tick_clock(version),
        node_id  = node_id()";

const TOMBSTONE_SQL: &str = "\
    UPDATE gskbookmarks SET
        metadata = '', tags = ',', desc = '', xhsum = '',
        flags    = flags | 1,
        version  = tick_clock(version),
        modified = strftime('%s','now')
    WHERE url = ?1";

const RECORD_COLUMNS: &str =
    "url, metadata, desc, tags, module, flags, xhsum, version, node_id, modified";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{}: database held by another writer", path.display())]
    ForeignWriter { path: PathBuf },

    #[error("{}: schema version {found} is newer than supported {supported}", path.display())]
    SchemaDowngrade {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("{}: no gosuki schema", path.display())]
    Uninitialized { path: PathBuf },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Sqlite(err) if is_busy(err) => ErrorKind::Transient,
            StoreError::Sqlite(_) => ErrorKind::Recoverable,
            StoreError::ForeignWriter { .. } | StoreError::SchemaDowngrade { .. } => {
                ErrorKind::Fatal
            }
            StoreError::Uninitialized { .. } => ErrorKind::User,
            StoreError::Io { source, .. }
                if source.kind() == io::ErrorKind::PermissionDenied =>
            {
                ErrorKind::Fatal
            }
            StoreError::Io { .. } => ErrorKind::Fatal,
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

#[derive(Debug)]
enum Mode {
    /// In-memory working set, periodically backed up to `path`.
    MemoryBacked,
    /// Operating directly on the disk file (importers, one-shot commands).
    Direct,
}

#[derive(Debug)]
pub struct Store {
    conn: Connection,
    path: PathBuf,
    mode: Mode,
    clock: Arc<LamportClock>,
    node_id: NodeId,
}

impl Store {
    /// Open the engine store: probe for a foreign writer, migrate the disk
    /// file, load it into memory and seed the clock from `max(version)`.
    pub fn open(
        path: impl Into<PathBuf>,
        clock: Arc<LamportClock>,
        node_id: NodeId,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let mut disk = open_disk(&path, &clock, node_id)?;
        migrate(&mut disk, &path)?;

        let mut conn = Connection::open_in_memory()?;
        register_functions(&conn, &clock, node_id)?;
        restore(&disk, &mut conn)?;
        drop(disk);

        let store = Self {
            conn,
            path,
            mode: Mode::MemoryBacked,
            clock,
            node_id,
        };
        store.clock.seed(store.max_version()?);
        Ok(store)
    }

    /// Open the disk file directly, for importers. Same probe and migration
    /// path as the engine; writes land on disk immediately.
    pub fn open_direct(
        path: impl Into<PathBuf>,
        clock: Arc<LamportClock>,
        node_id: NodeId,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let mut disk = open_disk(&path, &clock, node_id)?;
        migrate(&mut disk, &path)?;

        let store = Self {
            conn: disk,
            path,
            mode: Mode::Direct,
            clock,
            node_id,
        };
        store.clock.seed(store.max_version()?);
        Ok(store)
    }

    /// Read-only view of an existing disk file, for `search`.
    pub fn open_read_only(
        path: impl Into<PathBuf>,
        clock: Arc<LamportClock>,
        node_id: NodeId,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| match err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::CannotOpen =>
            {
                StoreError::Uninitialized { path: path.clone() }
            }
            other => StoreError::Sqlite(other),
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        register_functions(&conn, &clock, node_id)?;
        if !table_exists(&conn, "gskbookmarks")? {
            return Err(StoreError::Uninitialized { path });
        }
        Ok(Self {
            conn,
            path,
            mode: Mode::Direct,
            clock,
            node_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn clock(&self) -> &Arc<LamportClock> {
        &self.clock
    }

    /// Upsert a merged bookmark and return the committed row.
    pub fn upsert(&self, bm: &Bookmark) -> Result<BookmarkRecord, StoreError> {
        self.conn.execute(
            UPSERT_SQL,
            params![bm.url, bm.title, bm.tags.to_column(), bm.desc, bm.module],
        )?;
        self.get_raw(&bm.url)?
            .ok_or_else(|| StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Apply a whole batch in one transaction. On any failure the
    /// transaction rolls back and nothing from the batch is visible.
    pub fn upsert_batch(&mut self, items: &[Bookmark]) -> Result<Vec<BookmarkRecord>, StoreError> {
        let tx = self.conn.transaction()?;
        let mut committed = Vec::with_capacity(items.len());
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for bm in items {
                stmt.execute(params![
                    bm.url,
                    bm.title,
                    bm.tags.to_column(),
                    bm.desc,
                    bm.module
                ])?;
            }
            let mut read = tx.prepare_cached(&format!(
                "SELECT {RECORD_COLUMNS} FROM gskbookmarks WHERE url = ?1"
            ))?;
            for bm in items {
                let rec = read
                    .query_row(params![bm.url], map_record)
                    .optional()?
                    .ok_or(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))?;
                committed.push(rec);
            }
        }
        tx.commit()?;
        Ok(committed)
    }

    /// Tombstone a URL. Returns the pre-delete row (with the tombstone flag
    /// and version applied) so hook matching can still see its tags, or
    /// `None` when the URL was never stored.
    pub fn delete(&self, url: &str) -> Result<Option<BookmarkRecord>, StoreError> {
        let Some(before) = self.get_raw(url)? else {
            return Ok(None);
        };
        self.conn.execute(TOMBSTONE_SQL, params![url])?;
        let after = self
            .get_raw(url)?
            .ok_or(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))?;
        Ok(Some(BookmarkRecord {
            // hooks match on what the bookmark was, stamped with the
            // tombstone's clock
            tags: before.tags,
            title: before.title,
            desc: before.desc,
            module: before.module,
            ..after
        }))
    }

    /// Fetch a row including tombstones.
    pub fn get_raw(&self, url: &str) -> Result<Option<BookmarkRecord>, StoreError> {
        let rec = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM gskbookmarks WHERE url = ?1"),
                params![url],
                map_record,
            )
            .optional()?;
        Ok(rec)
    }

    /// Fetch a live row (tombstones excluded).
    pub fn get(&self, url: &str) -> Result<Option<BookmarkRecord>, StoreError> {
        Ok(self.get_raw(url)?.filter(|rec| !rec.is_tombstone()))
    }

    /// All rows in URL order, tombstones included.
    pub fn scan(&self) -> Result<Vec<BookmarkRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM gskbookmarks ORDER BY url"
        ))?;
        let rows = stmt.query_map([], map_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Rows with `version > watermark`, in version order. The sync export.
    pub fn records_since(&self, watermark: u64) -> Result<Vec<BookmarkRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM gskbookmarks WHERE version > ?1 ORDER BY version"
        ))?;
        let rows = stmt.query_map(params![watermark as i64], map_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Write a record verbatim, preserving its origin stamps. Used by sync
    /// import; never ticks the clock.
    pub fn put_record(&self, rec: &BookmarkRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO gskbookmarks
                 (url, metadata, desc, tags, module, flags, xhsum, version, node_id, modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                rec.url,
                rec.title,
                rec.desc,
                rec.tags,
                rec.module,
                rec.flags,
                rec.xhsum,
                rec.version as i64,
                rec.node_id,
                rec.modified,
            ],
        )?;
        Ok(())
    }

    pub fn max_version(&self) -> Result<u64, StoreError> {
        let max: i64 =
            self.conn
                .query_row("SELECT COALESCE(MAX(version), 0) FROM gskbookmarks", [], |r| {
                    r.get(0)
                })?;
        Ok(max.max(0) as u64)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM gskbookmarks WHERE flags & 1 = 0",
            [],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    /// Watermark last acknowledged by `peer` (0 when unknown).
    pub fn watermark(&self, peer: &str) -> Result<u64, StoreError> {
        let wm: Option<i64> = self
            .conn
            .query_row(
                "SELECT watermark FROM gskpeers WHERE peer = ?1",
                params![peer],
                |r| r.get(0),
            )
            .optional()?;
        Ok(wm.unwrap_or(0).max(0) as u64)
    }

    pub fn set_watermark(&self, peer: &str, watermark: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO gskpeers (peer, watermark) VALUES (?1, ?2)
             ON CONFLICT(peer) DO UPDATE SET watermark = MAX(watermark, excluded.watermark)",
            params![peer, watermark as i64],
        )?;
        Ok(())
    }

    /// Drop tombstones every known peer has already seen.
    pub fn reap_tombstones(&self, min_peer_watermark: u64) -> Result<usize, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM gskbookmarks WHERE flags & 1 = 1 AND version <= ?1",
            params![min_peer_watermark as i64],
        )?;
        Ok(removed)
    }

    /// Prefix + fuzzy search over title and URL, with tag filters.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<BookmarkRecord>, StoreError> {
        let mut sql = format!(
            "SELECT {RECORD_COLUMNS} FROM gskbookmarks WHERE flags & 1 = 0"
        );
        let mut args: Vec<String> = Vec::new();

        for term in &query.terms {
            let n = args.len() + 1;
            sql.push_str(&format!(
                " AND (metadata LIKE ?{n} || '%' OR url LIKE ?{n} || '%' \
                   OR fuzzy(?{n}, metadata) OR fuzzy(?{n}, url))"
            ));
            args.push(term.clone());
        }
        for tag in &query.all_tags {
            sql.push_str(&format!(" AND tags LIKE ?{}", args.len() + 1));
            args.push(format!("%,{},%", tag));
        }
        if !query.any_tags.is_empty() {
            let mut group = Vec::new();
            for tag in &query.any_tags {
                group.push(format!("tags LIKE ?{}", args.len() + 1));
                args.push(format!("%,{},%", tag));
            }
            sql.push_str(&format!(" AND ({})", group.join(" OR ")));
        }
        sql.push_str(" ORDER BY url");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), map_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Back the in-memory working set up to the disk file. A no-op in
    /// direct mode.
    pub fn backup_to_disk(&self) -> Result<(), StoreError> {
        if matches!(self.mode, Mode::Direct) {
            return Ok(());
        }
        let mut disk = Connection::open(&self.path)?;
        disk.busy_timeout(BUSY_TIMEOUT)?;
        let backup = Backup::new(&self.conn, &mut disk)?;
        backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::from_millis(5), None)?;
        Ok(())
    }

    /// Flush and drop the connection. Called once on clean shutdown.
    pub fn close(self) -> Result<(), StoreError> {
        self.backup_to_disk()?;
        Ok(())
    }
}

/// Parsed `search` arguments: bare words are terms, `:a,b` filters by all
/// tags, `:OR c,d` filters by any tag.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub terms: Vec<String>,
    pub all_tags: Vec<String>,
    pub any_tags: Vec<String>,
}

impl SearchQuery {
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut query = SearchQuery::default();
        let mut or_pending = false;
        for arg in args {
            let arg = arg.as_ref().trim();
            if arg.is_empty() {
                continue;
            }
            if or_pending {
                or_pending = false;
                push_tags(&mut query.any_tags, arg);
                continue;
            }
            if let Some(rest) = arg.strip_prefix(':') {
                let rest = rest.trim();
                if rest.eq_ignore_ascii_case("OR") {
                    or_pending = true;
                } else if let Some(list) = rest
                    .strip_prefix("OR ")
                    .or_else(|| rest.strip_prefix("or "))
                {
                    push_tags(&mut query.any_tags, list);
                } else {
                    push_tags(&mut query.all_tags, rest);
                }
            } else {
                query.terms.push(arg.to_string());
            }
        }
        query
    }
}

fn push_tags(into: &mut Vec<String>, list: &str) {
    for tag in list.split(',') {
        let tag = tag.trim().to_ascii_lowercase();
        if !tag.is_empty() {
            into.push(tag);
        }
    }
}

fn map_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<BookmarkRecord> {
    Ok(BookmarkRecord {
        url: row.get(0)?,
        title: row.get(1)?,
        desc: row.get(2)?,
        tags: row.get(3)?,
        module: row.get(4)?,
        flags: row.get::<_, i64>(5)?.max(0) as u32,
        xhsum: row.get(6)?,
        version: row.get::<_, i64>(7)?.max(0) as u64,
        node_id: row.get(8)?,
        modified: row.get(9)?,
    })
}

fn open_disk(
    path: &Path,
    clock: &Arc<LamportClock>,
    node_id: NodeId,
) -> Result<Connection, StoreError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let conn = Connection::open(path)?;
    probe_foreign_writer(&conn, path)?;
    // pragmas take locks of their own, so they run after the probe; a busy
    // failure past this point still means a foreign writer
    let pragmas = apply_pragmas(&conn);
    if let Err(err) = pragmas {
        if is_busy(&err) {
            return Err(StoreError::ForeignWriter {
                path: path.to_path_buf(),
            });
        }
        return Err(err.into());
    }
    register_functions(&conn, clock, node_id)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Detect a foreign writer: take and immediately roll back a write lock.
/// `SQLITE_BUSY` here means another process holds the database.
fn probe_foreign_writer(conn: &Connection, path: &Path) -> Result<(), StoreError> {
    conn.busy_timeout(PROBE_TIMEOUT)?;
    let probe = conn.execute_batch("BEGIN IMMEDIATE; ROLLBACK;");
    conn.busy_timeout(BUSY_TIMEOUT)?;
    match probe {
        Ok(()) => Ok(()),
        Err(err) if is_busy(&err) => Err(StoreError::ForeignWriter {
            path: path.to_path_buf(),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Register the schema-contract scalar functions on a connection.
pub fn register_functions(
    conn: &Connection,
    clock: &Arc<LamportClock>,
    node_id: NodeId,
) -> rusqlite::Result<()> {
    let pure = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("xhash", 1, pure, |ctx| {
        let input: String = ctx.get(0)?;
        Ok(xhash(&input))
    })?;

    conn.create_scalar_function("fuzzy", 2, pure, |ctx| {
        let pattern: String = ctx.get(0)?;
        let text: String = ctx.get(1)?;
        Ok(fuzzy_match_fold(&pattern, &text))
    })?;

    // not deterministic: every call advances the process clock
    let tick_clock = Arc::clone(clock);
    conn.create_scalar_function("tick_clock", 1, FunctionFlags::SQLITE_UTF8, move |ctx| {
        let previous: i64 = ctx.get(0)?;
        Ok(tick_clock.tick(previous.max(0) as u64) as i64)
    })?;

    let node = node_id.to_string();
    conn.create_scalar_function("node_id", 0, pure, move |_| Ok(node.clone()))?;

    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Apply forward migrations inside a single transaction. Never downgrades:
/// a file written by a newer build is a fatal error.
fn migrate(conn: &mut Connection, path: &Path) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
             version    INTEGER PRIMARY KEY,
             applied_at INTEGER NOT NULL
         )",
    )?;
    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;
    let current = current.max(0) as u32;

    if current > SCHEMA_VERSION {
        return Err(StoreError::SchemaDowngrade {
            path: path.to_path_buf(),
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    if current == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, strftime('%s','now'))",
            params![version],
        )?;
        tracing::info!(version, "applied schema migration");
    }
    tx.commit()?;
    Ok(())
}

/// Load the disk database wholesale into the in-memory connection.
fn restore(disk: &Connection, mem: &mut Connection) -> Result<(), StoreError> {
    let backup = Backup::new(disk, mem)?;
    backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::ZERO, None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TagSet;
    use tempfile::TempDir;

    fn fresh_store(dir: &TempDir) -> Store {
        Store::open(
            dir.path().join("gosuki.db"),
            Arc::new(LamportClock::new()),
            NodeId::generate(),
        )
        .expect("open store")
    }

    fn bm(url: &str, title: &str, tags: &[&str]) -> Bookmark {
        Bookmark::new(url, "test@unit")
            .with_title(title)
            .with_tags(tags.iter().copied().collect::<TagSet>())
    }

    #[test]
    fn first_upsert_gets_version_one() {
        let dir = TempDir::new().expect("tempdir");
        let store = fresh_store(&dir);
        let rec = store
            .upsert(&bm("https://example.com", "Hello #world", &["research", "world"]))
            .expect("upsert");
        assert_eq!(rec.version, 1);
        assert_eq!(rec.tags, ",research,world,");
        assert_ne!(rec.xhsum, "");
        assert_ne!(rec.xhsum, "0");
    }

    #[test]
    fn upsert_bumps_version_strictly() {
        let dir = TempDir::new().expect("tempdir");
        let store = fresh_store(&dir);
        let first = store.upsert(&bm("https://x/", "a", &[])).expect("upsert");
        let second = store.upsert(&bm("https://x/", "b", &[])).expect("upsert");
        assert!(second.version > first.version);
    }

    #[test]
    fn empty_incoming_title_preserves_the_stored_one() {
        let dir = TempDir::new().expect("tempdir");
        let store = fresh_store(&dir);
        store.upsert(&bm("https://x/", "Keep me", &["a"])).expect("upsert");
        let rec = store.upsert(&bm("https://x/", "", &["a", "b"])).expect("upsert");
        assert_eq!(rec.title, "Keep me");
        assert_eq!(rec.tags, ",a,b,");
        // xhsum reflects the preserved title, not the empty incoming one
        assert_eq!(
            rec.xhsum,
            crate::core::xhsum_fields("https://x/", "Keep me", ",a,b,", "")
        );
    }

    #[test]
    fn delete_leaves_a_tombstone_with_bumped_version() {
        let dir = TempDir::new().expect("tempdir");
        let store = fresh_store(&dir);
        store
            .upsert(&bm("https://x/", "t", &["research"]))
            .expect("upsert");
        let deleted = store.delete("https://x/").expect("delete").expect("existed");
        assert!(deleted.is_tombstone());
        assert_eq!(deleted.version, 2);
        // hook matching still sees the pre-delete tags
        assert_eq!(deleted.tags, ",research,");

        let raw = store.get_raw("https://x/").expect("get").expect("row");
        assert!(raw.is_tombstone());
        assert_eq!(raw.tags, ",");
        assert_eq!(raw.xhsum, "");
        assert!(store.get("https://x/").expect("get").is_none());
    }

    #[test]
    fn reupsert_resurrects_a_tombstone() {
        let dir = TempDir::new().expect("tempdir");
        let store = fresh_store(&dir);
        store.upsert(&bm("https://x/", "t", &[])).expect("upsert");
        store.delete("https://x/").expect("delete");
        let rec = store.upsert(&bm("https://x/", "back", &[])).expect("upsert");
        assert!(!rec.is_tombstone());
        assert_eq!(rec.version, 3);
    }

    #[test]
    fn compat_view_projects_legacy_columns() {
        let dir = TempDir::new().expect("tempdir");
        let store = fresh_store(&dir);
        store
            .upsert(&bm("https://x/", "Title", &["a"]))
            .expect("upsert");

        let (id, url, metadata, tags, flags): (i64, String, String, String, i64) = store
            .conn
            .query_row(
                "SELECT id, URL, metadata, tags, flags FROM bookmarks",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .expect("select from view");
        assert!(id > 0);
        assert_eq!(url, "https://x/");
        assert_eq!(metadata, "Title");
        assert_eq!(tags, ",a,");
        assert_eq!(flags, 0);
    }

    #[test]
    fn inserting_through_the_view_fills_engine_columns() {
        let dir = TempDir::new().expect("tempdir");
        let store = fresh_store(&dir);
        store
            .conn
            .execute(
                "INSERT INTO bookmarks (URL, metadata, tags, desc, flags)
                 VALUES ('https://legacy/', 'Legacy', ',old,', '', 0)",
                [],
            )
            .expect("insert via view");

        let rec = store
            .get("https://legacy/")
            .expect("get")
            .expect("row exists");
        assert_eq!(rec.version, 1);
        assert_eq!(rec.module, "buku");
        assert_eq!(rec.node_id, store.node_id().to_string());
        assert_eq!(
            rec.xhsum,
            crate::core::xhsum_fields("https://legacy/", "Legacy", ",old,", "")
        );
    }

    #[test]
    fn updating_through_the_view_ticks_the_clock() {
        let dir = TempDir::new().expect("tempdir");
        let store = fresh_store(&dir);
        store.upsert(&bm("https://x/", "old", &[])).expect("upsert");
        store
            .conn
            .execute(
                "UPDATE bookmarks SET metadata = 'new' WHERE URL = 'https://x/'",
                [],
            )
            .expect("update via view");
        let rec = store.get("https://x/").expect("get").expect("row");
        assert_eq!(rec.title, "new");
        assert_eq!(rec.version, 2);
    }

    #[test]
    fn clock_is_seeded_from_max_version_on_open() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("gosuki.db");
        {
            let store = Store::open_direct(
                path.clone(),
                Arc::new(LamportClock::new()),
                NodeId::generate(),
            )
            .expect("open");
            for i in 0..3 {
                store
                    .upsert(&bm(&format!("https://x{i}/"), "t", &[]))
                    .expect("upsert");
            }
        }
        let clock = Arc::new(LamportClock::new());
        let _store = Store::open(path, Arc::clone(&clock), NodeId::generate()).expect("reopen");
        assert_eq!(clock.current(), 3);
    }

    #[test]
    fn backup_round_trips_through_the_disk_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("gosuki.db");
        let store = Store::open(
            path.clone(),
            Arc::new(LamportClock::new()),
            NodeId::generate(),
        )
        .expect("open");
        store.upsert(&bm("https://x/", "t", &["a"])).expect("upsert");
        store.backup_to_disk().expect("backup");
        drop(store);

        let reopened = Store::open(
            path,
            Arc::new(LamportClock::new()),
            NodeId::generate(),
        )
        .expect("reopen");
        let rec = reopened.get("https://x/").expect("get").expect("persisted");
        assert_eq!(rec.tags, ",a,");
    }

    #[test]
    fn foreign_writer_is_detected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("gosuki.db");
        // initialize the file first
        drop(
            Store::open_direct(
                path.clone(),
                Arc::new(LamportClock::new()),
                NodeId::generate(),
            )
            .expect("init"),
        );

        let foreign = Connection::open(&path).expect("open");
        foreign
            .execute_batch("BEGIN IMMEDIATE")
            .expect("hold write lock");

        let err = Store::open(
            path,
            Arc::new(LamportClock::new()),
            NodeId::generate(),
        )
        .expect_err("must refuse");
        assert!(matches!(err, StoreError::ForeignWriter { .. }));
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("gosuki.db");
        {
            let conn = Connection::open(&path).expect("open");
            conn.execute_batch(
                "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL);
                 INSERT INTO schema_version VALUES (999, 0);",
            )
            .expect("seed");
        }
        let err = Store::open(
            path,
            Arc::new(LamportClock::new()),
            NodeId::generate(),
        )
        .expect_err("downgrade");
        assert!(matches!(err, StoreError::SchemaDowngrade { found: 999, .. }));
    }

    #[test]
    fn search_matches_prefix_fuzzy_and_tags() {
        let dir = TempDir::new().expect("tempdir");
        let store = fresh_store(&dir);
        store
            .upsert(&bm("https://rust-lang.org/", "Rust Language", &["lang", "docs"]))
            .expect("upsert");
        store
            .upsert(&bm("https://example.com/", "Example", &["misc"]))
            .expect("upsert");

        // prefix on title
        let hits = store
            .search(&SearchQuery::parse(["Rust"]))
            .expect("search");
        assert_eq!(hits.len(), 1);

        // fuzzy subsequence
        let hits = store.search(&SearchQuery::parse(["rstlng"])).expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://rust-lang.org/");

        // AND tags filter
        let hits = store
            .search(&SearchQuery::parse([":lang,docs"]))
            .expect("search");
        assert_eq!(hits.len(), 1);
        let hits = store
            .search(&SearchQuery::parse([":lang,misc"]))
            .expect("search");
        assert!(hits.is_empty());

        // OR tags filter
        let hits = store
            .search(&SearchQuery::parse([":OR", "lang,misc"]))
            .expect("search");
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn search_query_parsing() {
        let q = SearchQuery::parse(["rust", ":a,b", ":OR", "c,d"]);
        assert_eq!(q.terms, vec!["rust"]);
        assert_eq!(q.all_tags, vec!["a", "b"]);
        assert_eq!(q.any_tags, vec!["c", "d"]);

        let q = SearchQuery::parse([":OR c,d"]);
        assert_eq!(q.any_tags, vec!["c", "d"]);
    }

    #[test]
    fn watermarks_round_trip_and_reap() {
        let dir = TempDir::new().expect("tempdir");
        let store = fresh_store(&dir);
        store.upsert(&bm("https://x/", "t", &[])).expect("upsert");
        store.delete("https://x/").expect("delete"); // tombstone v2

        store.set_watermark("laptop", 1).expect("wm");
        assert_eq!(store.watermark("laptop").expect("wm"), 1);
        // not all peers past the tombstone yet
        assert_eq!(store.reap_tombstones(1).expect("reap"), 0);

        store.set_watermark("laptop", 5).expect("wm");
        assert_eq!(store.reap_tombstones(5).expect("reap"), 1);
        assert!(store.get_raw("https://x/").expect("get").is_none());

        // watermarks never move backwards
        store.set_watermark("laptop", 2).expect("wm");
        assert_eq!(store.watermark("laptop").expect("wm"), 5);
    }
}
