// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Task executor boundary
//!
//! An executor carries out one run's objective and reports progress through
//! the [`StepSink`] it was created with. The relay never inspects how the work
//! is done; it only numbers, forwards and records what the sink receives.

mod process;
mod scripted;

pub use process::ProcessExecutorFactory;
pub use scripted::{ScriptedExecutorFactory, ScriptedRun};

use crate::error::ExecutorError;
use async_trait::async_trait;
use rr_domain_types::{Principal, StepEvent};
use serde_json::Value;
use std::sync::Arc;

/// What an executor is asked to do
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub run_id: String,
    pub principal: Principal,
    pub objective: String,
}

/// Result of a successful task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutcome {
    pub final_answer: Option<String>,
    pub commands: Vec<Value>,
}

/// Receives progress while a task runs
#[async_trait]
pub trait StepSink: Send + Sync {
    async fn on_step(&self, event: StepEvent);

    /// Screenshot not tied to a step
    async fn on_screenshot(&self, screenshot: String);
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn perform_task(&self) -> Result<TaskOutcome, ExecutorError>;

    /// Release the executor's resources. Must be safe to call more than once
    /// and while `perform_task` is still running.
    async fn close(&self) -> Result<(), ExecutorError>;
}

#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    async fn create(
        &self,
        request: TaskRequest,
        sink: Arc<dyn StepSink>,
    ) -> Result<Arc<dyn TaskExecutor>, ExecutorError>;
}
