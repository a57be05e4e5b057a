//! Marktab action invocation.
//!
//! A marktab binds an action name to an external program. On every committed
//! upsert or delete the engine matches the record's tags and recorded
//! `@action` names against the bindings and invokes each match with the
//! bookmark serialized as JSON on stdin. Hook execution is best-effort:
//! failures are logged, never propagated.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::core::BookmarkRecord;

use super::dispatcher::HookFired;

/// Marktab configuration: action name -> program to run.
#[derive(Clone, Debug, Default)]
pub struct HookConfig {
    pub bindings: BTreeMap<String, String>,
    /// Kill an invocation that runs longer than this.
    pub timeout: Duration,
    /// Invocations running at once.
    pub max_concurrent: usize,
}

impl HookConfig {
    pub fn new(bindings: BTreeMap<String, String>) -> Self {
        Self {
            bindings,
            timeout: Duration::from_secs(5),
            max_concurrent: 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Action names that fire for a committed record: explicit `@action` tokens
/// plus any binding whose name matches a tag (folder names having become
/// tags upstream).
pub fn matched_actions(
    record: &BookmarkRecord,
    actions: &std::collections::BTreeSet<String>,
    config: &HookConfig,
) -> Vec<String> {
    let tags = record.tag_set();
    let mut out = Vec::new();
    for name in config.bindings.keys() {
        if actions.contains(name) || tags.contains(name) {
            out.push(name.clone());
        }
    }
    out
}

/// Consume `HookFired` events until the channel closes or shutdown.
pub fn run_hook_loop(rx: Receiver<HookFired>, config: HookConfig, shutdown: Arc<AtomicBool>) {
    let mut running: Vec<(String, Instant, Child)> = Vec::new();

    loop {
        reap_finished(&mut running, config.timeout);
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(event) => {
                // concurrency cap: wait out the oldest invocation first
                while running.len() >= config.max_concurrent.max(1) {
                    std::thread::sleep(Duration::from_millis(50));
                    reap_finished(&mut running, config.timeout);
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                }
                if let Some(child) = invoke(&event, &config) {
                    running.push((event.action.clone(), Instant::now(), child));
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // don't leave orphans behind on shutdown
    for (action, _, mut child) in running {
        if child.try_wait().ok().flatten().is_none() {
            tracing::debug!(action, "killing hook at shutdown");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn invoke(event: &HookFired, config: &HookConfig) -> Option<Child> {
    let program = config.bindings.get(&event.action)?;
    let payload = match serde_json::to_vec(&event.bookmark) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(action = %event.action, "serialize bookmark: {err}");
            return None;
        }
    };

    let mut child = match Command::new(program)
        .arg(&event.action)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            tracing::error!(action = %event.action, program, "spawn hook: {err}");
            return None;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(err) = stdin.write_all(&payload) {
            tracing::warn!(action = %event.action, "write hook stdin: {err}");
        }
        // closing stdin signals end of input
    }
    tracing::debug!(action = %event.action, program, url = %event.bookmark.url, "hook fired");
    Some(child)
}

fn reap_finished(running: &mut Vec<(String, Instant, Child)>, timeout: Duration) {
    running.retain_mut(|(action, started, child)| match child.try_wait() {
        Ok(Some(status)) => {
            if !status.success() {
                tracing::warn!(action = %action, %status, "hook exited nonzero");
            }
            false
        }
        Ok(None) => {
            if started.elapsed() > timeout {
                tracing::warn!(action = %action, "hook timed out, killing");
                let _ = child.kill();
                let _ = child.wait();
                false
            } else {
                true
            }
        }
        Err(err) => {
            tracing::warn!(action = %action, "wait hook: {err}");
            false
        }
    });
}
