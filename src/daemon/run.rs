//! Engine bootstrap and the long-running service loops.

use std::io::Write;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::browsers::{BrowserFamily, Profile, Registry, chrome_profiles, mozilla_profiles};
use crate::config::Config;
use crate::core::{Bookmark, LamportClock, NodeId, UrlIndex};
use crate::sources::{BookmarkSource, ChromeSource, MozillaSource, QuteSource};
use crate::{Error, Result};

use super::dispatcher::{
    DEFAULT_QUEUE_CAPACITY, DeleteBatch, DeliveryPolicy, Dispatcher, HookFired, StoreCommitted,
    SyncIncoming, UpsertBatch,
};
use super::hooks::{self, HookConfig};
use super::merger::Merger;
use super::scratch;
use super::store::Store;
use super::sync;
use super::watcher::run_source_driver;

const SHUTDOWN_SLICE: Duration = Duration::from_millis(250);
const TRANSIENT_RETRIES: u32 = 3;

/// Run the engine as a foreground service until SIGINT/SIGTERM.
pub fn run(config: &Config) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown));
    run_with_shutdown(config, shutdown)
}

/// Engine body with an injectable shutdown flag.
pub fn run_with_shutdown(config: &Config, shutdown: Arc<AtomicBool>) -> Result<()> {
    let db_path = config.db_path();
    let data_root = db_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(crate::paths::data_dir);
    let scratch_dir = data_root.join("scratch");

    if let Err(err) = scratch::sweep(&scratch_dir, scratch::SWEEP_AGE) {
        tracing::warn!("scratch sweep: {err}");
    }

    let node_id = NodeId::load_or_create(&data_root.join("node_id"))?;
    let clock = Arc::new(LamportClock::new());
    let store = Store::open(&db_path, Arc::clone(&clock), node_id)?;
    tracing::info!(db = %db_path.display(), node = %node_id, "store open");

    let index = Arc::new(RwLock::new(UrlIndex::from_records(store.scan()?)));
    let indexed = index.read().unwrap_or_else(|e| e.into_inner()).len();
    tracing::info!(bookmarks = indexed, "index rebuilt");

    let mut registry = Registry::builtin();
    for def in &config.browsers.extra {
        registry.add(def.clone());
    }
    let sources = discover_sources(&registry, &scratch_dir);
    tracing::info!(sources = sources.len(), "browsers detected");

    let dispatcher = Dispatcher::new();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // merger: single writer of the URL index
    {
        let rx = dispatcher.source_reloaded.subscribe(
            "merger",
            DEFAULT_QUEUE_CAPACITY,
            DeliveryPolicy::Block,
        );
        let dispatcher = Arc::clone(&dispatcher);
        let merger = Merger::new(Arc::clone(&index));
        let shutdown = Arc::clone(&shutdown);
        handles.push(std::thread::spawn(move || {
            run_merger_loop(merger, rx, dispatcher, shutdown);
        }));
    }

    // store writer: the only SQLite writer in the process
    {
        let upserts = dispatcher.upserts.subscribe(
            "store",
            DEFAULT_QUEUE_CAPACITY,
            DeliveryPolicy::Block,
        );
        let deletes = dispatcher.deletes.subscribe(
            "store",
            DEFAULT_QUEUE_CAPACITY,
            DeliveryPolicy::Block,
        );
        let sync_rx = dispatcher.sync_incoming.subscribe(
            "store",
            DEFAULT_QUEUE_CAPACITY,
            DeliveryPolicy::Block,
        );
        let dispatcher = Arc::clone(&dispatcher);
        let index = Arc::clone(&index);
        let shutdown = Arc::clone(&shutdown);
        let hook_config = config.hook_config();
        let peers = config.sync.peers.clone();
        let backup_interval = config.backup_interval();
        handles.push(std::thread::spawn(move || {
            run_store_loop(StoreLoop {
                store,
                index,
                upserts,
                deletes,
                sync_rx,
                dispatcher,
                hook_config,
                peers,
                backup_interval,
                shutdown,
            });
        }));
    }

    // hook worker, only when something is bound
    let hook_config = config.hook_config();
    if !hook_config.is_empty() {
        let rx = dispatcher.hooks.subscribe(
            "hooks",
            DEFAULT_QUEUE_CAPACITY,
            DeliveryPolicy::DropOldest,
        );
        let shutdown = Arc::clone(&shutdown);
        handles.push(std::thread::spawn(move || {
            hooks::run_hook_loop(rx, hook_config, shutdown);
        }));
    }

    // one driver thread per source
    let watcher_config = config.watcher_config();
    for source in sources {
        let dispatcher = Arc::clone(&dispatcher);
        let shutdown = Arc::clone(&shutdown);
        handles.push(std::thread::spawn(move || {
            run_source_driver(source, watcher_config, dispatcher, shutdown);
        }));
    }

    // event stream endpoint doubles as the foreground loop
    let socket_path = data_root.join("gosuki.sock");
    run_event_stream(&socket_path, &dispatcher, &shutdown)?;

    tracing::info!("shutting down");
    for handle in handles {
        let _ = handle.join();
    }
    scratch::clear_guards();
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Build a source per detected browser profile.
fn discover_sources(registry: &Registry, scratch_dir: &Path) -> Vec<Box<dyn BookmarkSource>> {
    let mut sources: Vec<Box<dyn BookmarkSource>> = Vec::new();
    for def in registry.detected() {
        let base = match def.expand_base_dir() {
            Ok(base) => base,
            Err(err) => {
                tracing::warn!(flavour = %def.flavour, "expand base dir: {err}");
                continue;
            }
        };
        match def.family {
            BrowserFamily::Mozilla => {
                for profile in mozilla_profiles(&base) {
                    sources.push(Box::new(MozillaSource::new(
                        &def.flavour,
                        &profile,
                        scratch_dir,
                    )));
                }
            }
            BrowserFamily::Chrome => {
                for profile in chrome_profiles(&base) {
                    sources.push(Box::new(ChromeSource::new(&def.flavour, &profile)));
                }
            }
            BrowserFamily::Qute => {
                let profile = Profile {
                    name: "default".to_string(),
                    dir: base,
                };
                sources.push(Box::new(QuteSource::new(&def.flavour, &profile)));
            }
            BrowserFamily::Other => {
                tracing::debug!(flavour = %def.flavour, "no parser for family, skipping");
            }
        }
    }
    sources
}

fn run_merger_loop(
    mut merger: Merger,
    rx: Receiver<super::dispatcher::SourceReloaded>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match rx.recv_timeout(SHUTDOWN_SLICE) {
            Ok(reload) => {
                let outcome = merger.apply(&reload.source_id, &reload.tree);
                if outcome.is_empty() {
                    continue;
                }
                tracing::debug!(
                    source = %reload.source_id,
                    upserts = outcome.upserts.len(),
                    deletes = outcome.deletes.len(),
                    "merged"
                );
                if !outcome.upserts.is_empty() {
                    dispatcher.upserts.publish(UpsertBatch {
                        source_id: reload.source_id.clone(),
                        items: outcome.upserts,
                    });
                }
                if !outcome.deletes.is_empty() {
                    dispatcher.deletes.publish(DeleteBatch {
                        source_id: reload.source_id,
                        urls: outcome.deletes,
                    });
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

struct StoreLoop {
    store: Store,
    index: Arc<RwLock<UrlIndex>>,
    upserts: Receiver<UpsertBatch>,
    deletes: Receiver<DeleteBatch>,
    sync_rx: Receiver<SyncIncoming>,
    dispatcher: Arc<Dispatcher>,
    hook_config: HookConfig,
    peers: Vec<String>,
    backup_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

fn run_store_loop(mut ctx: StoreLoop) {
    // select! keeps the receivers borrowed while an arm runs, so work from
    // clones and leave `ctx` free for the handlers
    let upserts = ctx.upserts.clone();
    let deletes = ctx.deletes.clone();
    let sync_rx = ctx.sync_rx.clone();

    let mut last_backup = Instant::now();
    let mut dirty = false;

    loop {
        if ctx.shutdown.load(Ordering::Relaxed) {
            // drain whatever is already queued before the final flush
            while let Ok(batch) = upserts.try_recv() {
                handle_upsert_batch(&mut ctx, batch);
            }
            while let Ok(batch) = deletes.try_recv() {
                handle_delete_batch(&mut ctx, batch);
            }
            break;
        }

        crossbeam::select! {
            recv(upserts) -> msg => match msg {
                Ok(batch) => {
                    handle_upsert_batch(&mut ctx, batch);
                    dirty = true;
                }
                Err(_) => break,
            },
            recv(deletes) -> msg => match msg {
                Ok(batch) => {
                    handle_delete_batch(&mut ctx, batch);
                    dirty = true;
                }
                Err(_) => break,
            },
            recv(sync_rx) -> msg => match msg {
                Ok(incoming) => {
                    handle_sync_incoming(&mut ctx, incoming);
                    dirty = true;
                }
                Err(_) => break,
            },
            default(SHUTDOWN_SLICE) => {}
        }

        if dirty && last_backup.elapsed() >= ctx.backup_interval {
            flush(&ctx);
            dirty = false;
            last_backup = Instant::now();
        }
    }

    match ctx.store.close() {
        Ok(()) => tracing::info!("store flushed and closed"),
        Err(err) => tracing::error!("final backup failed: {err}"),
    }
}

fn flush(ctx: &StoreLoop) {
    if let Err(err) = ctx.store.backup_to_disk() {
        tracing::error!("backup failed: {err}");
        return;
    }
    match sync::reap(&ctx.store, &ctx.peers) {
        Ok(0) => {}
        Ok(reaped) => tracing::debug!(reaped, "reaped tombstones"),
        Err(err) => tracing::warn!("tombstone reaping failed: {err}"),
    }
}

fn handle_upsert_batch(ctx: &mut StoreLoop, batch: UpsertBatch) {
    for attempt in 0..=TRANSIENT_RETRIES {
        match ctx.store.upsert_batch(&batch.items) {
            Ok(records) => {
                for (bm, record) in batch.items.iter().zip(records) {
                    for action in hooks::matched_actions(&record, &bm.actions, &ctx.hook_config) {
                        ctx.dispatcher.hooks.publish(HookFired {
                            action,
                            bookmark: record.clone(),
                        });
                    }
                    ctx.dispatcher
                        .committed
                        .publish(StoreCommitted::Upsert { record });
                }
                return;
            }
            Err(err) if err.kind().is_transient() && attempt < TRANSIENT_RETRIES => {
                std::thread::sleep(Duration::from_millis(100u64 << attempt));
            }
            Err(err) => {
                tracing::error!(
                    source = %batch.source_id,
                    items = batch.items.len(),
                    kind = err.kind().as_str(),
                    "upsert batch poisoned, skipping: {err}"
                );
                rollback_index(ctx, batch.items.iter().map(|bm| bm.url.as_str()));
                return;
            }
        }
    }
}

fn handle_delete_batch(ctx: &mut StoreLoop, batch: DeleteBatch) {
    for url in &batch.urls {
        match ctx.store.delete(url) {
            Ok(Some(record)) => {
                // folder- and tag-bound hooks still fire for deletions
                for action in
                    hooks::matched_actions(&record, &Default::default(), &ctx.hook_config)
                {
                    ctx.dispatcher.hooks.publish(HookFired {
                        action,
                        bookmark: record.clone(),
                    });
                }
                ctx.dispatcher.committed.publish(StoreCommitted::Delete {
                    url: record.url.clone(),
                    version: record.version,
                });
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(
                    source = %batch.source_id,
                    url,
                    kind = err.kind().as_str(),
                    "delete poisoned, skipping: {err}"
                );
                rollback_index(ctx, std::iter::once(url.as_str()));
            }
        }
    }
}

fn handle_sync_incoming(ctx: &mut StoreLoop, incoming: SyncIncoming) {
    match sync::import(&ctx.store, incoming.records) {
        Ok(outcome) => {
            if outcome.applied.is_empty() {
                return;
            }
            let mut index = ctx.index.write().unwrap_or_else(|e| e.into_inner());
            for record in outcome.applied {
                if record.is_tombstone() {
                    index.remove(&record.url);
                    ctx.dispatcher.committed.publish(StoreCommitted::Delete {
                        url: record.url.clone(),
                        version: record.version,
                    });
                } else {
                    index.upsert(Bookmark {
                        url: record.url.clone(),
                        title: record.title.clone(),
                        desc: record.desc.clone(),
                        tags: record.tag_set(),
                        module: record.module.clone(),
                        actions: Default::default(),
                    });
                    ctx.dispatcher
                        .committed
                        .publish(StoreCommitted::Upsert { record });
                }
            }
        }
        Err(err) => tracing::error!("sync import failed: {err}"),
    }
}

/// Re-align the L1 index with the store for the given URLs after a
/// poisoned batch.
fn rollback_index<'a>(ctx: &StoreLoop, urls: impl Iterator<Item = &'a str>) {
    let mut index = ctx.index.write().unwrap_or_else(|e| e.into_inner());
    for url in urls {
        match ctx.store.get(url) {
            Ok(Some(record)) => index.upsert(Bookmark {
                url: record.url.clone(),
                title: record.title,
                desc: record.desc,
                tags: crate::core::TagSet::from_column(&record.tags),
                module: record.module,
                actions: Default::default(),
            }),
            Ok(None) => {
                index.remove(url);
            }
            Err(err) => tracing::warn!(url, "index rollback read failed: {err}"),
        }
    }
}

/// Publish committed mutations as JSON lines on a Unix socket. Runs in the
/// calling thread and doubles as the engine's foreground wait loop.
fn run_event_stream(
    socket_path: &PathBuf,
    dispatcher: &Arc<Dispatcher>,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path).map_err(Error::Io)?;
    listener.set_nonblocking(true).map_err(Error::Io)?;
    tracing::info!(socket = %socket_path.display(), "event stream listening");

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                let rx = dispatcher.committed.subscribe(
                    "event-stream",
                    DEFAULT_QUEUE_CAPACITY,
                    DeliveryPolicy::DropOldest,
                );
                let shutdown = Arc::clone(shutdown);
                std::thread::spawn(move || serve_event_client(stream, rx, shutdown));
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(err) => {
                tracing::error!("accept error: {err}");
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
    Ok(())
}

fn serve_event_client(
    mut stream: UnixStream,
    rx: Receiver<StoreCommitted>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match rx.recv_timeout(SHUTDOWN_SLICE) {
            Ok(event) => {
                let Ok(mut line) = serde_json::to_string(&event) else {
                    continue;
                };
                line.push('\n');
                if stream.write_all(line.as_bytes()).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
