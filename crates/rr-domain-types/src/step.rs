// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Steps recorded while a run executes

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action taken by the executor
///
/// Serialised as `{ "type": kind, ...args }`, for example
/// `{"type": "click", "selector": "#submit"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

impl StepAction {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            args: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Progress reported by an executor, before it is numbered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub action: StepAction,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// A numbered step of a run
///
/// Numbers start at 1 and increase by one per step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub step_number: u32,
    pub action: StepAction,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl Step {
    pub fn from_event(step_number: u32, event: StepEvent) -> Self {
        Self {
            step_number,
            action: event.action,
            explanation: event.explanation,
            screenshot: event.screenshot,
        }
    }
}
