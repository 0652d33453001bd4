// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Executor backed by an external process
//!
//! The configured program is launched once per run with the objective as its
//! last argument. It reports progress as newline-delimited JSON on stdout:
//!
//! ```text
//! {"event":"step","action":{"type":"click","selector":"#go"},"explanation":"submit","screenshot":"<base64>"}
//! {"event":"screenshot","screenshot":"<base64>"}
//! {"event":"done","finalAnswer":"...","commands":[...]}
//! {"event":"error","message":"..."}
//! ```
//!
//! Lines that do not parse are logged and skipped. Stderr is inherited.

use super::{ExecutorFactory, StepSink, TaskExecutor, TaskOutcome, TaskRequest};
use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, RelayError, RelayResult};
use async_trait::async_trait;
use rr_domain_types::StepEvent;
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ProcessEvent {
    Step(StepEvent),
    Screenshot {
        screenshot: String,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        #[serde(default)]
        final_answer: Option<String>,
        #[serde(default)]
        commands: Vec<Value>,
    },
    Error {
        message: String,
    },
}

/// Launches one executor process per run
#[derive(Debug, Clone)]
pub struct ProcessExecutorFactory {
    program: String,
    args: Vec<String>,
}

impl ProcessExecutorFactory {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> RelayResult<Self> {
        let program = config
            .command
            .clone()
            .ok_or_else(|| RelayError::Config("executor.command is not set".to_string()))?;
        Ok(Self::new(program, config.args.clone()))
    }
}

#[async_trait]
impl ExecutorFactory for ProcessExecutorFactory {
    async fn create(
        &self,
        request: TaskRequest,
        sink: Arc<dyn StepSink>,
    ) -> Result<Arc<dyn TaskExecutor>, ExecutorError> {
        Ok(Arc::new(ProcessExecutor {
            program: self.program.clone(),
            args: self.args.clone(),
            request,
            sink,
            child: Mutex::new(None),
            closed: CancellationToken::new(),
        }))
    }
}

struct ProcessExecutor {
    program: String,
    args: Vec<String>,
    request: TaskRequest,
    sink: Arc<dyn StepSink>,
    child: Mutex<Option<Child>>,
    closed: CancellationToken,
}

impl ProcessExecutor {
    async fn kill(&self) {
        if let Some(child) = self.child.lock().await.as_mut() {
            if let Err(err) = child.start_kill() {
                debug!(run_id = %self.request.run_id, error = %err, "executor process already gone");
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for ProcessExecutor {
    async fn perform_task(&self) -> Result<TaskOutcome, ExecutorError> {
        if self.closed.is_cancelled() {
            return Err(ExecutorError::Closed);
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.request.objective)
            .env("RUN_RELAY_RUN_ID", &self.request.run_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                ExecutorError::Initialization(format!("failed to launch {}: {err}", self.program))
            })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ExecutorError::Initialization("executor stdout was not captured".to_string())
        })?;
        info!(run_id = %self.request.run_id, pid = ?child.id(), program = %self.program, "executor process started");
        *self.child.lock().await = Some(child);

        let mut lines = BufReader::new(stdout).lines();
        let mut result: Option<Result<TaskOutcome, ExecutorError>> = None;

        loop {
            let line = tokio::select! {
                _ = self.closed.cancelled() => {
                    self.kill().await;
                    return Err(ExecutorError::Closed);
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<ProcessEvent>(line) {
                Ok(ProcessEvent::Step(event)) => self.sink.on_step(event).await,
                Ok(ProcessEvent::Screenshot { screenshot }) => {
                    self.sink.on_screenshot(screenshot).await
                }
                Ok(ProcessEvent::Done {
                    final_answer,
                    commands,
                }) => {
                    result = Some(Ok(TaskOutcome {
                        final_answer,
                        commands,
                    }))
                }
                Ok(ProcessEvent::Error { message }) => {
                    result = Some(Err(ExecutorError::Failed(message)))
                }
                Err(err) => {
                    warn!(run_id = %self.request.run_id, error = %err, "ignoring unreadable executor output")
                }
            }
        }

        let status = {
            let mut guard = self.child.lock().await;
            let child = guard.as_mut().ok_or(ExecutorError::Closed)?;
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = self.closed.cancelled() => None,
            };
            match waited {
                Some(status) => status?,
                None => {
                    let _ = child.start_kill();
                    return Err(ExecutorError::Closed);
                }
            }
        };
        debug!(run_id = %self.request.run_id, %status, "executor process exited");

        match result {
            Some(result) => result,
            None if status.success() => Ok(TaskOutcome::default()),
            None => Err(ExecutorError::Failed(format!(
                "executor exited with {status} before reporting a result"
            ))),
        }
    }

    async fn close(&self) -> Result<(), ExecutorError> {
        self.closed.cancel();
        // perform_task holds the lock while waiting and kills the child itself.
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
            }
        }
        Ok(())
    }
}
