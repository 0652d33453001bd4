// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Run store boundary
//!
//! Every operation is scoped to the calling principal: a run or automation
//! owned by someone else is reported as not found.

mod memory;
mod sqlite;

pub use memory::InMemoryRunStore;
pub use sqlite::SqliteRunStore;

use crate::error::PersistenceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rr_domain_types::{Automation, Principal, RunRecord, RunStatus, Step};

/// Extra data written together with a status change
#[derive(Debug, Clone, PartialEq)]
pub struct StatusDetail {
    pub at: DateTime<Utc>,
    pub final_answer: Option<String>,
    pub error: Option<String>,
}

impl StatusDetail {
    pub fn now() -> Self {
        Self {
            at: Utc::now(),
            final_answer: None,
            error: None,
        }
    }

    pub fn with_answer(mut self, answer: Option<String>) -> Self {
        self.final_answer = answer;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Durable storage for runs, their steps and saved automations
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn fetch_run(
        &self,
        run_id: &str,
        principal: &Principal,
    ) -> Result<RunRecord, PersistenceError>;

    /// Move a run to `status` in a single write.
    ///
    /// Fails with [`PersistenceError::InvalidTransition`] unless the current
    /// status may move to `status`.
    async fn update_status(
        &self,
        run_id: &str,
        principal: &Principal,
        status: RunStatus,
        detail: StatusDetail,
    ) -> Result<(), PersistenceError>;

    async fn append_step(
        &self,
        run_id: &str,
        principal: &Principal,
        step: &Step,
    ) -> Result<(), PersistenceError>;

    async fn fetch_automation(
        &self,
        automation_id: &str,
        principal: &Principal,
    ) -> Result<Automation, PersistenceError>;

    /// Create a pending run owned by `principal`.
    async fn create_run(
        &self,
        principal: &Principal,
        objective: &str,
    ) -> Result<RunRecord, PersistenceError>;
}

/// Apply a status change to an in-memory record.
///
/// Entering `InProgress` starts a fresh attempt: earlier steps and outcome
/// are discarded and `started_at` is reset.
pub(crate) fn apply_status(
    run: &mut RunRecord,
    status: RunStatus,
    detail: StatusDetail,
) -> Result<(), PersistenceError> {
    if !run.status.can_transition_to(status) {
        return Err(PersistenceError::InvalidTransition {
            from: run.status,
            to: status,
        });
    }

    run.status = status;
    if status == RunStatus::InProgress {
        run.started_at = Some(detail.at);
        run.completed_at = None;
        run.steps.clear();
        run.final_answer = None;
        run.error = None;
    } else if status.is_terminal() {
        run.completed_at = Some(detail.at);
        run.final_answer = detail.final_answer;
        run.error = detail.error;
    }
    Ok(())
}
