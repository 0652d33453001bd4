// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-run execution registry
//!
//! At most one execution per key is active in the process. An entry exists
//! from acquisition until its [`RunLease`] is dropped; it holds the executor
//! (once created) so shutdown can release it, the steps recorded so far, the
//! completion once sent, and the single connection currently observing the
//! run.
//!
//! All state sits behind one mutex. Frames for the observer are queued while
//! the lock is held, which keeps step numbering and delivery order identical
//! even when the observer changes mid-run.

use crate::connection::ConnectionSender;
use crate::error::RelayError;
use crate::executor::TaskExecutor;
use rr_domain_types::{Step, StepEvent};
use rr_wire_contract::ServerMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// The key is already held by another execution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("run {0} is already active")]
pub struct AcquisitionConflict(pub String);

impl From<AcquisitionConflict> for RelayError {
    fn from(conflict: AcquisitionConflict) -> Self {
        RelayError::AcquisitionConflict(conflict.0)
    }
}

struct ActiveRun {
    lease_id: u64,
    executor: Option<Arc<dyn TaskExecutor>>,
    observer: ConnectionSender,
    steps: Vec<Step>,
    finished: Option<ServerMessage>,
}

/// Result of [`RunRegistry::acquire_or_attach`]
pub enum Acquired {
    /// The caller now owns the execution
    Lease(RunLease),
    /// The run was already executing with no connected observer; the caller
    /// became its observer and was sent the recorded steps. If the run had
    /// already sent its completion, that follows the steps and the caller's
    /// connection is closed.
    Observer { replayed: usize },
}

#[derive(Default)]
pub struct RunRegistry {
    entries: Mutex<HashMap<String, ActiveRun>>,
    next_lease: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ActiveRun>> {
        // Every update is a single insert, push or remove, so a poisoned map
        // is still consistent.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `key` for a new execution observed by `observer`.
    pub fn try_acquire(
        self: &Arc<Self>,
        key: &str,
        observer: ConnectionSender,
    ) -> Result<RunLease, AcquisitionConflict> {
        let mut entries = self.entries();
        if entries.contains_key(key) {
            return Err(AcquisitionConflict(key.to_string()));
        }
        Ok(self.insert(&mut entries, key, observer))
    }

    /// Claim `key`, or take over observing it if its execution has lost its
    /// observer.
    ///
    /// Fails while the current observer is still connected.
    pub fn acquire_or_attach(
        self: &Arc<Self>,
        key: &str,
        observer: ConnectionSender,
    ) -> Result<Acquired, AcquisitionConflict> {
        let mut entries = self.entries();
        if let Some(active) = entries.get_mut(key) {
            if !active.observer.is_closed() {
                return Err(AcquisitionConflict(key.to_string()));
            }
            for step in &active.steps {
                observer.send(ServerMessage::StepUpdate(step.clone()));
            }
            if let Some(completion) = &active.finished {
                observer.send(completion.clone());
                observer.close();
                info!(
                    run = key,
                    connection = %observer.id(),
                    replayed = active.steps.len(),
                    "replayed finished run to late observer"
                );
                return Ok(Acquired::Observer {
                    replayed: active.steps.len(),
                });
            }
            info!(
                run = key,
                connection = %observer.id(),
                replayed = active.steps.len(),
                "observer took over active run"
            );
            active.observer = observer;
            return Ok(Acquired::Observer {
                replayed: active.steps.len(),
            });
        }
        Ok(Acquired::Lease(self.insert(&mut entries, key, observer)))
    }

    fn insert(
        self: &Arc<Self>,
        entries: &mut HashMap<String, ActiveRun>,
        key: &str,
        observer: ConnectionSender,
    ) -> RunLease {
        let lease_id = self.next_lease.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            key.to_string(),
            ActiveRun {
                lease_id,
                executor: None,
                observer,
                steps: Vec::new(),
                finished: None,
            },
        );
        debug!(run = key, lease_id, "run acquired");
        RunLease {
            key: key.to_string(),
            lease_id,
            registry: Arc::clone(self),
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.entries().len()
    }

    /// Close every executor (best-effort), then forget all entries.
    ///
    /// Leases still held elsewhere become inert. Returns the number of
    /// entries cleared.
    pub async fn shutdown(&self) -> usize {
        let executors: Vec<(String, Arc<dyn TaskExecutor>)> = self
            .entries()
            .iter()
            .filter_map(|(key, active)| {
                active
                    .executor
                    .as_ref()
                    .map(|executor| (key.clone(), Arc::clone(executor)))
            })
            .collect();

        for (key, executor) in executors {
            if let Err(err) = executor.close().await {
                warn!(run = %key, error = %err, "failed to close executor during shutdown");
            }
        }

        let mut entries = self.entries();
        let cleared = entries.len();
        entries.clear();
        cleared
    }

    fn with_entry<T>(
        &self,
        key: &str,
        lease_id: u64,
        f: impl FnOnce(&mut ActiveRun) -> T,
    ) -> Option<T> {
        let mut entries = self.entries();
        entries
            .get_mut(key)
            .filter(|active| active.lease_id == lease_id)
            .map(f)
    }

    fn release(&self, key: &str, lease_id: u64) {
        let mut entries = self.entries();
        if entries.get(key).is_some_and(|active| active.lease_id == lease_id) {
            entries.remove(key);
            debug!(run = key, lease_id, "run released");
        }
    }
}

/// Exclusive claim on a registry key
///
/// Dropping the lease releases the key, including during unwinding.
pub struct RunLease {
    key: String,
    lease_id: u64,
    registry: Arc<RunRegistry>,
}

impl RunLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record the executor so shutdown can close it. False if the entry was
    /// already cleared.
    pub fn attach_executor(&self, executor: Arc<dyn TaskExecutor>) -> bool {
        self.registry
            .with_entry(&self.key, self.lease_id, |active| {
                active.executor = Some(executor)
            })
            .is_some()
    }

    /// Number the event, keep it, and forward it to the observer.
    ///
    /// Steps are numbered from 1 with no gaps. A step carrying a screenshot is
    /// followed by a `screenshot_update`. Returns `None` once the entry has
    /// been cleared by shutdown.
    pub fn record_step(&self, event: StepEvent) -> Option<Step> {
        self.registry
            .with_entry(&self.key, self.lease_id, |active| {
                let step_number = active.steps.len() as u32 + 1;
                let step = Step::from_event(step_number, event);
                active.steps.push(step.clone());
                active
                    .observer
                    .send(ServerMessage::StepUpdate(step.clone()));
                if let Some(screenshot) = &step.screenshot {
                    active.observer.send(ServerMessage::ScreenshotUpdate {
                        screenshot: screenshot.clone(),
                    });
                }
                step
            })
    }

    /// Send to whoever observes the run now; false if nobody received it.
    pub fn publish(&self, message: ServerMessage) -> bool {
        self.registry
            .with_entry(&self.key, self.lease_id, |active| {
                active.observer.send(message)
            })
            .unwrap_or(false)
    }

    /// Send the run's completion and keep it for observers that attach
    /// before the lease is released.
    pub fn finish(&self, completion: ServerMessage) -> bool {
        self.registry
            .with_entry(&self.key, self.lease_id, |active| {
                active.finished = Some(completion.clone());
                active.observer.send(completion)
            })
            .unwrap_or(false)
    }

    pub fn close_observer(&self) {
        self.registry
            .with_entry(&self.key, self.lease_id, |active| active.observer.close());
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.lease_id);
    }
}
