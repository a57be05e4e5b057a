//! Scratch copies of locked browser databases.
//!
//! Mozilla keeps `places.sqlite` exclusively locked while the browser runs,
//! so parses work on a private copy. Copies are tracked in a guard list and
//! removed on drop; a startup sweep clears leftovers from crashed runs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const SCRATCH_PREFIX: &str = "gosuki-scratch-";

/// Scratch files older than this are considered crash leftovers.
pub const SWEEP_AGE: Duration = Duration::from_secs(10 * 60);

static GUARDS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
static NONCE: AtomicU64 = AtomicU64::new(0);

/// A scratch copy that removes itself when dropped.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        let _ = fs::remove_file(sidecar(&self.path, "-wal"));
        if let Ok(mut guards) = GUARDS.lock() {
            guards.retain(|p| p != &self.path);
        }
    }
}

/// Copy `src` (and its `-wal` sidecar when present) into `dir`. The copy
/// bypasses the browser's exclusive lock: plain file reads are not blocked
/// by SQLite locking.
pub fn copy_to_scratch(dir: &Path, src: &Path) -> io::Result<ScratchFile> {
    fs::create_dir_all(dir)?;

    let nonce = NONCE.fetch_add(1, Ordering::Relaxed);
    let name = format!("{SCRATCH_PREFIX}{}-{}.sqlite", std::process::id(), nonce);
    let dst = dir.join(name);
    fs::copy(src, &dst)?;

    let wal_src = sidecar(src, "-wal");
    if wal_src.is_file() {
        // Best effort: without the WAL the copy is still a consistent
        // (if slightly stale) snapshot.
        let _ = fs::copy(&wal_src, sidecar(&dst, "-wal"));
    }

    if let Ok(mut guards) = GUARDS.lock() {
        guards.push(dst.clone());
    }
    Ok(ScratchFile { path: dst })
}

/// Remove scratch files left behind by a crashed run.
///
/// Only touches files matching the scratch pattern and older than `max_age`.
pub fn sweep(dir: &Path, max_age: Duration) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(SCRATCH_PREFIX) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| mtime.elapsed().ok());
        if age.is_some_and(|age| age >= max_age) && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(removed, "swept stale scratch files");
    }
    Ok(removed)
}

/// Remove every live scratch file. Called on engine shutdown as a backstop;
/// normally each guard has already cleaned up on drop.
pub fn clear_guards() {
    let paths: Vec<PathBuf> = match GUARDS.lock() {
        Ok(mut guards) => guards.drain(..).collect(),
        Err(_) => return,
    };
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}
