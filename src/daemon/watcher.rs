//! Per-source reload driver: filesystem events in, debounced parses out.
//!
//! State machine per source:
//!
//! ```text
//! Idle -> (event) -> Debouncing -> (quiet for debounce window) -> Reloading
//! Reloading -> success -> Idle
//! Reloading -> transient error -> Backoff -> (timer) -> Reloading
//! Reloading -> fatal error -> Failed   (parked until restart)
//! ```
//!
//! Backoff is exponential, capped, jittered. Watches are directory-level and
//! re-registered after every successful reload so rename-based atomic
//! replaces keep being observed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, unbounded};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use rand::Rng;

use crate::sources::{BookmarkSource, WatchMode, WatchTarget};

use super::dispatcher::{Dispatcher, SourceReloaded};

/// Timing knobs for all source drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Quiet window after the last event before reloading.
    pub debounce: Duration,
    /// First backoff delay after a transient failure.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
}

/// Debounce below this floor turns browser write bursts into reload storms.
pub const MIN_DEBOUNCE: Duration = Duration::from_millis(250);

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1500),
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

impl WatcherConfig {
    /// Clamp the debounce window to the supported floor.
    pub fn clamped(mut self) -> Self {
        if self.debounce < MIN_DEBOUNCE {
            self.debounce = MIN_DEBOUNCE;
        }
        self
    }
}

/// Exponential backoff with ±20% jitter.
fn backoff_delay(cfg: &WatcherConfig, attempt: u32) -> Duration {
    let exp = cfg
        .backoff_base
        .saturating_mul(2u32.saturating_pow(attempt.min(16)))
        .min(cfg.backoff_cap);
    let jitter: f64 = rand::thread_rng().gen_range(0.8..=1.2);
    exp.mul_f64(jitter).min(cfg.backoff_cap)
}

#[derive(Debug)]
enum State {
    Idle,
    Debouncing { deadline: Instant },
    Backoff { attempt: u32, until: Instant },
    Failed,
}

/// Idle slice between shutdown checks; keeps drivers joining well inside
/// the 2-second shutdown deadline.
const SHUTDOWN_SLICE: Duration = Duration::from_millis(500);

/// Run one source's watch/parse loop until shutdown. Never panics the
/// engine: all source errors end in Backoff or Failed.
pub fn run_source_driver(
    mut source: Box<dyn BookmarkSource>,
    cfg: WatcherConfig,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<AtomicBool>,
) {
    let cfg = cfg.clamped();
    let source_id = source.id().to_string();

    if let Err(err) = source.init() {
        tracing::error!(source = %source_id, kind = err.kind().as_str(), "init failed: {err}");
        return;
    }

    match source.watch() {
        WatchMode::Poll(interval) => {
            run_poll_loop(&mut *source, &source_id, interval, cfg, &dispatcher, &shutdown);
        }
        WatchMode::Files(targets) => {
            run_event_loop(&mut *source, &source_id, &targets, cfg, &dispatcher, &shutdown);
        }
    }

    source.shutdown();
    tracing::debug!(source = %source_id, "driver stopped");
}

fn run_poll_loop(
    source: &mut dyn BookmarkSource,
    source_id: &str,
    interval: Duration,
    cfg: WatcherConfig,
    dispatcher: &Dispatcher,
    shutdown: &AtomicBool,
) {
    let mut attempt = 0u32;
    let mut next = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        if Instant::now() < next {
            std::thread::sleep(SHUTDOWN_SLICE.min(next.saturating_duration_since(Instant::now())));
            continue;
        }
        match reload(source, source_id, dispatcher, shutdown) {
            Reload::Ok => {
                attempt = 0;
                next = Instant::now() + interval;
            }
            Reload::Transient => {
                attempt = attempt.saturating_add(1);
                next = Instant::now() + backoff_delay(&cfg, attempt);
            }
            Reload::Fatal => return,
        }
    }
}

fn run_event_loop(
    source: &mut dyn BookmarkSource,
    source_id: &str,
    targets: &[WatchTarget],
    cfg: WatcherConfig,
    dispatcher: &Dispatcher,
    shutdown: &AtomicBool,
) {
    let (tx, rx): (_, Receiver<()>) = unbounded();
    let event_id = source_id.to_string();
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(_) => {
                let _ = tx.send(());
            }
            Err(err) => {
                tracing::warn!(source = %event_id, "watch error: {err}");
            }
        }
    }) {
        Ok(watcher) => watcher,
        Err(err) => {
            tracing::error!(source = %source_id, "cannot create watcher: {err}");
            return;
        }
    };
    register_watches(&mut watcher, targets, source_id);

    // parse current state before the first event
    let mut state = match reload(source, source_id, dispatcher, shutdown) {
        Reload::Ok => State::Idle,
        Reload::Transient => State::Backoff {
            attempt: 1,
            until: Instant::now() + backoff_delay(&cfg, 1),
        },
        Reload::Fatal => State::Failed,
    };
    let mut attempt = match &state {
        State::Backoff { attempt, .. } => *attempt,
        _ => 0,
    };

    while !shutdown.load(Ordering::Relaxed) {
        let timeout = match &state {
            State::Idle | State::Failed => SHUTDOWN_SLICE,
            State::Debouncing { deadline } => deadline
                .saturating_duration_since(Instant::now())
                .min(SHUTDOWN_SLICE),
            State::Backoff { until, .. } => until
                .saturating_duration_since(Instant::now())
                .min(SHUTDOWN_SLICE),
        };

        match rx.recv_timeout(timeout) {
            Ok(()) => {
                state = match state {
                    State::Idle => State::Debouncing {
                        deadline: Instant::now() + cfg.debounce,
                    },
                    // every new event resets the quiet window
                    State::Debouncing { .. } => State::Debouncing {
                        deadline: Instant::now() + cfg.debounce,
                    },
                    // a reload is already scheduled; new events change nothing
                    other @ (State::Backoff { .. } | State::Failed) => other,
                };
            }
            Err(RecvTimeoutError::Timeout) => {
                let due = match &state {
                    State::Debouncing { deadline } => Instant::now() >= *deadline,
                    State::Backoff { until, .. } => Instant::now() >= *until,
                    _ => false,
                };
                if !due {
                    continue;
                }
                state = match reload(source, source_id, dispatcher, shutdown) {
                    Reload::Ok => {
                        attempt = 0;
                        // atomic replaces invalidate inode-level watches
                        register_watches(&mut watcher, targets, source_id);
                        State::Idle
                    }
                    Reload::Transient => {
                        attempt = attempt.saturating_add(1);
                        State::Backoff {
                            attempt,
                            until: Instant::now() + backoff_delay(&cfg, attempt),
                        }
                    }
                    Reload::Fatal => State::Failed,
                };
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn register_watches(watcher: &mut RecommendedWatcher, targets: &[WatchTarget], source_id: &str) {
    for target in targets {
        let _ = watcher.unwatch(&target.path);
        let mode = if target.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        if let Err(err) = watcher.watch(&target.path, mode) {
            tracing::debug!(source = %source_id, path = %target.path.display(), "watch: {err}");
        }
    }
}

enum Reload {
    Ok,
    Transient,
    Fatal,
}

fn reload(
    source: &mut dyn BookmarkSource,
    source_id: &str,
    dispatcher: &Dispatcher,
    shutdown: &AtomicBool,
) -> Reload {
    if shutdown.load(Ordering::Relaxed) {
        return Reload::Fatal;
    }
    match source.load() {
        Ok(tree) => {
            tracing::debug!(source = %source_id, urls = tree.url_count(), "reloaded");
            dispatcher.source_reloaded.publish(SourceReloaded {
                source_id: source_id.to_string(),
                tree,
            });
            Reload::Ok
        }
        Err(err) if err.is_transient() => {
            tracing::warn!(source = %source_id, "transient reload failure, backing off: {err}");
            Reload::Transient
        }
        Err(err) => {
            tracing::error!(
                source = %source_id,
                kind = err.kind().as_str(),
                "reload failed, source parked: {err}"
            );
            Reload::Fatal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeTree;
    use crate::daemon::dispatcher::DeliveryPolicy;
    use crate::sources::SourceError;

    #[test]
    fn backoff_grows_and_respects_the_cap() {
        let cfg = WatcherConfig {
            debounce: Duration::from_millis(300),
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(30),
        };
        for attempt in 0..20 {
            let delay = backoff_delay(&cfg, attempt);
            let nominal = cfg
                .backoff_base
                .saturating_mul(2u32.saturating_pow(attempt.min(16)))
                .min(cfg.backoff_cap);
            assert!(delay <= cfg.backoff_cap);
            assert!(delay >= nominal.mul_f64(0.8));
            assert!(delay <= nominal.mul_f64(1.2).min(cfg.backoff_cap));
        }
    }

    #[test]
    fn debounce_floor_is_enforced() {
        let cfg = WatcherConfig {
            debounce: Duration::from_millis(1),
            ..Default::default()
        }
        .clamped();
        assert_eq!(cfg.debounce, MIN_DEBOUNCE);
    }

    struct ScriptedSource {
        id: String,
        loads: std::sync::Mutex<Vec<Result<usize, SourceError>>>,
    }

    impl BookmarkSource for ScriptedSource {
        fn id(&self) -> &str {
            &self.id
        }

        fn init(&mut self) -> Result<(), SourceError> {
            Ok(())
        }

        fn watch(&self) -> WatchMode {
            WatchMode::Poll(Duration::from_millis(10))
        }

        fn load(&mut self) -> Result<NodeTree, SourceError> {
            let mut loads = self.loads.lock().expect("loads");
            match loads.pop() {
                Some(Ok(count)) => {
                    let mut tree = NodeTree::new();
                    let root = tree.root();
                    for i in 0..count {
                        tree.add_url(
                            root,
                            crate::core::Bookmark::new(format!("https://{i}/"), &self.id),
                        );
                    }
                    Ok(tree)
                }
                Some(Err(err)) => Err(err),
                None => Ok(NodeTree::new()),
            }
        }
    }

    #[test]
    fn poll_driver_publishes_reloads_and_survives_transient_errors() {
        let dispatcher = Dispatcher::new();
        let rx = dispatcher
            .source_reloaded
            .subscribe("test", 16, DeliveryPolicy::Block);
        let shutdown = Arc::new(AtomicBool::new(false));

        // scripted in reverse order: pop takes from the back
        let source = Box::new(ScriptedSource {
            id: "poll@test".into(),
            loads: std::sync::Mutex::new(vec![
                Ok(2),
                Err(SourceError::Locked { path: "/x".into() }),
                Ok(1),
            ]),
        });

        let driver = {
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || {
                run_source_driver(source, WatcherConfig::default(), dispatcher, shutdown)
            })
        };

        let first = rx.recv_timeout(Duration::from_secs(5)).expect("first reload");
        assert_eq!(first.tree.url_count(), 1);
        // the locked load backs off, then the next succeeds
        let second = rx.recv_timeout(Duration::from_secs(5)).expect("second reload");
        assert_eq!(second.tree.url_count(), 2);

        shutdown.store(true, Ordering::Relaxed);
        driver.join().expect("driver joins");
    }

    #[test]
    fn fatal_source_error_parks_the_driver() {
        let dispatcher = Dispatcher::new();
        let rx = dispatcher
            .source_reloaded
            .subscribe("test", 16, DeliveryPolicy::Block);
        let shutdown = Arc::new(AtomicBool::new(false));

        let source = Box::new(ScriptedSource {
            id: "poll@test".into(),
            loads: std::sync::Mutex::new(vec![Err(SourceError::Missing {
                path: "/gone".into(),
            })]),
        });

        let driver = {
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || {
                run_source_driver(source, WatcherConfig::default(), dispatcher, shutdown)
            })
        };
        // the fatal load ends the poll loop without publishing
        driver.join().expect("driver joins");
        assert!(rx.try_recv().is_err());
        shutdown.store(true, Ordering::Relaxed);
    }
}
