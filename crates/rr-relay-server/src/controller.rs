// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Run controller
//!
//! Drives one acquired run from start to a terminal status:
//!
//! 1. persist `INPROGRESS`; if the store refuses because the run already
//!    finished, report the stored result instead and stop
//! 2. create the executor with a sink that numbers, forwards and records steps
//! 3. run the task, containing errors and panics
//! 4. persist `COMPLETED`/`FAILED`, then send `completion`
//! 5. close the executor, close the observing connection, release the lease
//!
//! Persistence failures are logged and never stop client messaging. The
//! controller keeps going if its observer disconnects.

use crate::connection::ConnectionSender;
use crate::error::{ExecutorError, PersistenceError};
use crate::executor::{ExecutorFactory, StepSink, TaskExecutor, TaskOutcome, TaskRequest};
use crate::registry::{AcquisitionConflict, Acquired, RunLease, RunRegistry};
use crate::store::{RunStore, StatusDetail};
use async_trait::async_trait;
use rr_domain_types::{Principal, RunRecord, RunStatus, StepEvent};
use rr_wire_contract::{reasons, ServerMessage};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a controller is in its drive
///
/// A controller is `Pending` from construction until the store accepts
/// `INPROGRESS`. A run found already finished goes straight to `Released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Released,
}

/// Claim `key` for a new execution, or attach `observer` to the execution
/// already running under it when that one has lost its observer.
pub fn acquire(
    registry: &Arc<RunRegistry>,
    key: &str,
    observer: ConnectionSender,
) -> Result<Acquired, AcquisitionConflict> {
    debug!(run = key, "acquiring run");
    registry.acquire_or_attach(key, observer)
}

pub struct RunController {
    run_id: String,
    objective: String,
    principal: Principal,
    lease: Arc<RunLease>,
    store: Arc<dyn RunStore>,
    executors: Arc<dyn ExecutorFactory>,
    state: ControllerState,
}

impl RunController {
    pub fn new(
        lease: RunLease,
        run: &RunRecord,
        principal: Principal,
        store: Arc<dyn RunStore>,
        executors: Arc<dyn ExecutorFactory>,
    ) -> Self {
        Self {
            run_id: run.id.clone(),
            objective: run.objective.clone(),
            principal,
            lease: Arc::new(lease),
            store,
            executors,
            state: ControllerState::Pending,
        }
    }

    pub fn spawn(self) -> JoinHandle<ControllerState> {
        tokio::spawn(self.drive())
    }

    fn transition(&mut self, next: ControllerState) {
        info!(run_id = %self.run_id, from = ?self.state, to = ?next, "run controller state");
        self.state = next;
    }

    async fn persist(&self, status: RunStatus, detail: StatusDetail) {
        if let Err(err) = self
            .store
            .update_status(&self.run_id, &self.principal, status, detail)
            .await
        {
            warn!(run_id = %self.run_id, %status, error = %err, "failed to persist run status");
        }
    }

    /// Tell the observer how a run that can no longer start ended, or that it
    /// could not be started.
    async fn report_finished(&self) {
        match self.store.fetch_run(&self.run_id, &self.principal).await {
            Ok(run) if run.status.is_terminal() => {
                self.lease.publish(ServerMessage::existing_run(&run));
                self.lease.close_observer();
            }
            Ok(run) => {
                warn!(run_id = %self.run_id, status = %run.status, "run cannot be started");
                self.lease
                    .publish(ServerMessage::error(reasons::FAILED_TO_START));
            }
            Err(err) => {
                warn!(run_id = %self.run_id, error = %err, "failed to reload run");
                self.lease
                    .publish(ServerMessage::error(reasons::FAILED_TO_START));
            }
        }
    }

    fn release(mut self) -> ControllerState {
        self.transition(ControllerState::Released);
        let state = self.state;
        drop(self);
        state
    }

    pub async fn drive(mut self) -> ControllerState {
        match self
            .store
            .update_status(
                &self.run_id,
                &self.principal,
                RunStatus::InProgress,
                StatusDetail::now(),
            )
            .await
        {
            Ok(()) => {}
            Err(PersistenceError::InvalidTransition { from, .. }) => {
                info!(run_id = %self.run_id, status = %from, "run already finished; not executing");
                self.report_finished().await;
                return self.release();
            }
            Err(err) => {
                warn!(run_id = %self.run_id, status = %RunStatus::InProgress, error = %err, "failed to persist run status");
            }
        }
        self.transition(ControllerState::InProgress);

        let sink: Arc<dyn StepSink> = Arc::new(ControllerSink {
            lease: Arc::downgrade(&self.lease),
            store: Arc::clone(&self.store),
            run_id: self.run_id.clone(),
            principal: self.principal.clone(),
        });
        let request = TaskRequest {
            run_id: self.run_id.clone(),
            principal: self.principal.clone(),
            objective: self.objective.clone(),
        };

        let (executor, result) = match self.executors.create(request, sink).await {
            Ok(executor) => {
                let result = if self.lease.attach_executor(Arc::clone(&executor)) {
                    perform_contained(Arc::clone(&executor)).await
                } else {
                    // Shutdown cleared the registry before the executor existed.
                    Err(ExecutorError::Closed)
                };
                (Some(executor), result)
            }
            Err(err) => (None, Err(err)),
        };

        let completion = match result {
            Ok(TaskOutcome {
                final_answer,
                commands,
            }) => {
                self.transition(ControllerState::Completed);
                self.persist(
                    RunStatus::Completed,
                    StatusDetail::now().with_answer(final_answer.clone()),
                )
                .await;
                ServerMessage::completion_success(commands, final_answer)
            }
            Err(err) => {
                warn!(run_id = %self.run_id, error = %err, "run failed");
                self.transition(ControllerState::Failed);
                self.persist(
                    RunStatus::Failed,
                    StatusDetail::now().with_error(err.to_string()),
                )
                .await;
                ServerMessage::completion_failed(err.to_string())
            }
        };

        if !self.lease.finish(completion) {
            debug!(run_id = %self.run_id, "no connected observer for completion");
        }

        if let Some(executor) = executor {
            if let Err(err) = executor.close().await {
                warn!(run_id = %self.run_id, error = %err, "failed to close executor");
            }
        }
        self.lease.close_observer();
        self.release()
    }
}

async fn perform_contained(executor: Arc<dyn TaskExecutor>) -> Result<TaskOutcome, ExecutorError> {
    match tokio::spawn(async move { executor.perform_task().await }).await {
        Ok(result) => result,
        Err(join_err) => Err(ExecutorError::Panicked(join_err.to_string())),
    }
}

/// Step sink handed to executors
///
/// Holds the lease weakly: the executor must not keep a finished run's
/// registry slot alive.
struct ControllerSink {
    lease: Weak<RunLease>,
    store: Arc<dyn RunStore>,
    run_id: String,
    principal: Principal,
}

#[async_trait]
impl StepSink for ControllerSink {
    async fn on_step(&self, event: StepEvent) {
        let Some(step) = self.lease.upgrade().and_then(|lease| lease.record_step(event)) else {
            debug!(run_id = %self.run_id, "dropping step for released run");
            return;
        };
        if let Err(err) = self
            .store
            .append_step(&self.run_id, &self.principal, &step)
            .await
        {
            warn!(run_id = %self.run_id, step = step.step_number, error = %err, "failed to persist step");
        }
    }

    async fn on_screenshot(&self, screenshot: String) {
        if let Some(lease) = self.lease.upgrade() {
            lease.publish(ServerMessage::ScreenshotUpdate { screenshot });
        }
    }
}
