// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Executor that replays a fixed script
//!
//! Used by the mock dependencies, the integration tests and `--demo` mode.
//! The factory counts what it creates and closes so tests can check that the
//! relay releases every executor it starts.

use super::{ExecutorFactory, StepSink, TaskExecutor, TaskOutcome, TaskRequest};
use crate::error::ExecutorError;
use async_trait::async_trait;
use rr_domain_types::{StepAction, StepEvent};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
enum ScriptEvent {
    Step(StepEvent),
    Screenshot(String),
}

#[derive(Debug, Clone)]
enum ScriptEnd {
    Finish(TaskOutcome),
    Fail(String),
    Panic(String),
}

/// Events to emit and how the task ends
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    events: Vec<ScriptEvent>,
    end: ScriptEnd,
    step_delay: Duration,
    hold: Option<CancellationToken>,
    fail_on_create: Option<String>,
}

impl Default for ScriptedRun {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            end: ScriptEnd::Finish(TaskOutcome::default()),
            step_delay: Duration::ZERO,
            hold: None,
            fail_on_create: None,
        }
    }
}

impl ScriptedRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, kind: &str, explanation: &str) -> Self {
        self.events.push(ScriptEvent::Step(StepEvent {
            action: StepAction::new(kind),
            explanation: explanation.to_string(),
            screenshot: None,
        }));
        self
    }

    pub fn step_with_screenshot(mut self, kind: &str, explanation: &str, screenshot: &str) -> Self {
        self.events.push(ScriptEvent::Step(StepEvent {
            action: StepAction::new(kind),
            explanation: explanation.to_string(),
            screenshot: Some(screenshot.to_string()),
        }));
        self
    }

    pub fn event(mut self, event: StepEvent) -> Self {
        self.events.push(ScriptEvent::Step(event));
        self
    }

    /// Screenshot sent on its own, outside any step
    pub fn screenshot(mut self, screenshot: &str) -> Self {
        self.events
            .push(ScriptEvent::Screenshot(screenshot.to_string()));
        self
    }

    pub fn finish_with(mut self, final_answer: &str, commands: Vec<Value>) -> Self {
        self.end = ScriptEnd::Finish(TaskOutcome {
            final_answer: Some(final_answer.to_string()),
            commands,
        });
        self
    }

    pub fn fail_with(mut self, message: &str) -> Self {
        self.end = ScriptEnd::Fail(message.to_string());
        self
    }

    pub fn panic_with(mut self, message: &str) -> Self {
        self.end = ScriptEnd::Panic(message.to_string());
        self
    }

    pub fn fail_on_create(mut self, message: &str) -> Self {
        self.fail_on_create = Some(message.to_string());
        self
    }

    pub fn step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// After the last event, wait until `release` is cancelled (or the
    /// executor is closed) before ending.
    pub fn hold_until(mut self, release: CancellationToken) -> Self {
        self.hold = Some(release);
        self
    }
}

/// Hands out [`ScriptedRun`] replays, optionally chosen by objective
#[derive(Default)]
pub struct ScriptedExecutorFactory {
    default_script: Mutex<ScriptedRun>,
    by_objective: Mutex<HashMap<String, ScriptedRun>>,
    requests: Mutex<Vec<TaskRequest>>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedExecutorFactory {
    pub fn new(script: ScriptedRun) -> Self {
        Self {
            default_script: Mutex::new(script),
            ..Default::default()
        }
    }

    pub fn set_script(&self, script: ScriptedRun) {
        if let Ok(mut current) = self.default_script.lock() {
            *current = script;
        }
    }

    /// Use `script` for runs whose objective is exactly `objective`
    pub fn script_for(&self, objective: &str, script: ScriptedRun) {
        if let Ok(mut scripts) = self.by_objective.lock() {
            scripts.insert(objective.to_string(), script);
        }
    }

    pub fn requests(&self) -> Vec<TaskRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn created_count(&self) -> usize {
        self.requests().len()
    }

    /// Executors that have been closed at least once
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn script(&self, objective: &str) -> ScriptedRun {
        let by_objective = self
            .by_objective
            .lock()
            .ok()
            .and_then(|scripts| scripts.get(objective).cloned());
        by_objective
            .or_else(|| self.default_script.lock().ok().map(|s| s.clone()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExecutorFactory for ScriptedExecutorFactory {
    async fn create(
        &self,
        request: TaskRequest,
        sink: Arc<dyn StepSink>,
    ) -> Result<Arc<dyn TaskExecutor>, ExecutorError> {
        let script = self.script(&request.objective);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        if let Some(message) = &script.fail_on_create {
            return Err(ExecutorError::Initialization(message.clone()));
        }
        Ok(Arc::new(ScriptedExecutor {
            script,
            sink,
            closed: CancellationToken::new(),
            close_recorded: AtomicBool::new(false),
            closed_counter: Arc::clone(&self.closed),
        }))
    }
}

struct ScriptedExecutor {
    script: ScriptedRun,
    sink: Arc<dyn StepSink>,
    closed: CancellationToken,
    close_recorded: AtomicBool,
    closed_counter: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn perform_task(&self) -> Result<TaskOutcome, ExecutorError> {
        for event in &self.script.events {
            if !self.script.step_delay.is_zero() {
                tokio::select! {
                    _ = self.closed.cancelled() => return Err(ExecutorError::Closed),
                    _ = tokio::time::sleep(self.script.step_delay) => {}
                }
            }
            if self.closed.is_cancelled() {
                return Err(ExecutorError::Closed);
            }
            match event {
                ScriptEvent::Step(step) => self.sink.on_step(step.clone()).await,
                ScriptEvent::Screenshot(shot) => self.sink.on_screenshot(shot.clone()).await,
            }
        }

        if let Some(release) = &self.script.hold {
            tokio::select! {
                _ = self.closed.cancelled() => return Err(ExecutorError::Closed),
                _ = release.cancelled() => {}
            }
        }

        match &self.script.end {
            ScriptEnd::Finish(outcome) => Ok(outcome.clone()),
            ScriptEnd::Fail(message) => Err(ExecutorError::Failed(message.clone())),
            ScriptEnd::Panic(message) => panic!("{message}"),
        }
    }

    async fn close(&self) -> Result<(), ExecutorError> {
        self.closed.cancel();
        if !self.close_recorded.swap(true, Ordering::SeqCst) {
            self.closed_counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
