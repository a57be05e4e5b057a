//! Multi-device sync: last-writer-wins per URL, Lamport clock first,
//! device id as the deterministic tiebreaker.
//!
//! A device exports every record with `version > watermark[peer]`; importing
//! is idempotent and commutative, so two devices exchanging until quiescence
//! converge to the same `(url, xhsum)` projection. Deletions travel as
//! tombstones and are reaped once every configured peer's watermark has
//! passed them.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ErrorKind;
use crate::core::{BookmarkRecord, FLAG_TOMBSTONE};

use super::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Store(err) => err.kind(),
        }
    }
}

/// Bookmark fields carried by a live sync record. Tombstones have none.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub title: String,
    pub desc: String,
    /// Column form `,tag1,tag2,`.
    pub tags: String,
    pub module: String,
}

/// The unit of exchange between devices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub url: String,
    pub xhsum: String,
    pub version: u64,
    pub node_id: String,
    pub flags: u32,
    pub payload: Option<SyncPayload>,
}

impl SyncRecord {
    pub fn from_record(rec: &BookmarkRecord) -> Self {
        let payload = if rec.is_tombstone() {
            None
        } else {
            Some(SyncPayload {
                title: rec.title.clone(),
                desc: rec.desc.clone(),
                tags: rec.tags.clone(),
                module: rec.module.clone(),
            })
        };
        Self {
            url: rec.url.clone(),
            xhsum: rec.xhsum.clone(),
            version: rec.version,
            node_id: rec.node_id.clone(),
            flags: rec.flags,
            payload,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }

    fn into_record(self) -> BookmarkRecord {
        let payload = self.payload.unwrap_or(SyncPayload {
            title: String::new(),
            desc: String::new(),
            tags: ",".to_string(),
            module: String::new(),
        });
        BookmarkRecord {
            url: self.url,
            title: payload.title,
            desc: payload.desc,
            tags: payload.tags,
            module: payload.module,
            flags: self.flags,
            xhsum: self.xhsum,
            version: self.version,
            node_id: self.node_id,
            modified: now_unix(),
        }
    }

    /// LWW ordering key: `(version, node_id)` lexicographic.
    fn stamp(&self) -> (u64, &str) {
        (self.version, &self.node_id)
    }
}

/// Everything a peer with the given watermark has not seen yet.
pub fn export_since(store: &Store, watermark: u64) -> Result<Vec<SyncRecord>, SyncError> {
    Ok(store
        .records_since(watermark)?
        .iter()
        .map(SyncRecord::from_record)
        .collect())
}

/// Export for a named peer, keyed on its persisted watermark.
pub fn export_for_peer(store: &Store, peer: &str) -> Result<Vec<SyncRecord>, SyncError> {
    let watermark = store.watermark(peer)?;
    export_since(store, watermark)
}

#[derive(Debug, Default)]
pub struct ImportOutcome {
    /// Records that changed local state, in arrival order.
    pub applied: Vec<BookmarkRecord>,
    pub unchanged: usize,
    /// Highest incoming version seen, for advancing the peer watermark.
    pub max_version: u64,
}

/// Apply a batch of incoming records.
///
/// Per record: insert when unknown; no-op when the content hash already
/// matches; otherwise the larger `(version, node_id)` wins. The local clock
/// is raised past every accepted version so later local writes outrank
/// what was imported.
pub fn import(store: &Store, records: Vec<SyncRecord>) -> Result<ImportOutcome, SyncError> {
    let mut outcome = ImportOutcome::default();
    for incoming in records {
        outcome.max_version = outcome.max_version.max(incoming.version);
        match store.get_raw(&incoming.url)? {
            None => {
                store.clock().observe(incoming.version);
                let rec = incoming.into_record();
                store.put_record(&rec)?;
                outcome.applied.push(rec);
            }
            Some(local) if local.xhsum == incoming.xhsum => {
                outcome.unchanged += 1;
            }
            Some(local) => {
                let local_stamp = (local.version, local.node_id.as_str());
                if incoming.stamp() > local_stamp {
                    store.clock().observe(incoming.version);
                    let rec = incoming.into_record();
                    store.put_record(&rec)?;
                    outcome.applied.push(rec);
                } else {
                    outcome.unchanged += 1;
                }
            }
        }
    }
    Ok(outcome)
}

/// Reap tombstones every configured peer has acknowledged. With no peers
/// configured, reaping is disabled.
pub fn reap(store: &Store, peers: &[String]) -> Result<usize, SyncError> {
    if peers.is_empty() {
        return Ok(0);
    }
    let mut min = u64::MAX;
    for peer in peers {
        min = min.min(store.watermark(peer)?);
    }
    Ok(store.reap_tombstones(min)?)
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
