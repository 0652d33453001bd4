// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client and server message types

use rr_domain_types::{RunRecord, RunStatus, Step};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error texts sent in `error` and `authentication` frames
///
/// Clients match on these strings, so they are part of the contract.
pub mod reasons {
    pub const NOT_AUTHENTICATED: &str = "Not authenticated";
    pub const INVALID_TOKEN: &str = "Invalid authentication token";
    pub const FAILED_TO_PROCESS: &str = "Failed to process message";
    pub const FAILED_TO_START: &str = "Failed to start agent";
    pub const RUN_ALREADY_ACTIVE: &str = "Run is already active";
}

/// Messages sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    #[serde(rename_all = "camelCase")]
    StartAgent {
        run_id: String,
    },
    #[serde(rename_all = "camelCase")]
    StartScript {
        automation_id: String,
    },
    Heartbeat,
}

impl ClientMessage {
    /// Values of `type` that map to a [`ClientMessage`] variant
    pub const KNOWN_TYPES: [&'static str; 4] =
        ["authenticate", "start_agent", "start_script", "heartbeat"];

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Authenticate { .. } => "authenticate",
            ClientMessage::StartAgent { .. } => "start_agent",
            ClientMessage::StartScript { .. } => "start_script",
            ClientMessage::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Success,
    Failed,
}

/// Messages sent by the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Authentication {
        status: AuthStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ExistingRun {
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        steps: Option<Vec<Step>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_answer: Option<String>,
    },
    StepUpdate(Step),
    ScreenshotUpdate {
        screenshot: String,
    },
    #[serde(rename_all = "camelCase")]
    Completion {
        status: CompletionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commands: Option<Vec<Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_answer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        error: String,
    },
}

impl ServerMessage {
    pub fn error(reason: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: reason.into(),
        }
    }

    pub fn auth_success() -> Self {
        ServerMessage::Authentication {
            status: AuthStatus::Success,
            error: None,
        }
    }

    pub fn auth_failed() -> Self {
        ServerMessage::Authentication {
            status: AuthStatus::Failed,
            error: Some(reasons::INVALID_TOKEN.to_string()),
        }
    }

    /// Snapshot of a run that already reached a terminal status
    pub fn existing_run(run: &RunRecord) -> Self {
        ServerMessage::ExistingRun {
            status: run.status,
            steps: (!run.steps.is_empty()).then(|| run.steps.clone()),
            final_answer: run.reported_answer(),
        }
    }

    pub fn completion_success(commands: Vec<Value>, final_answer: Option<String>) -> Self {
        ServerMessage::Completion {
            status: CompletionStatus::Success,
            commands: Some(commands),
            final_answer,
            error: None,
        }
    }

    pub fn completion_failed(error: impl Into<String>) -> Self {
        ServerMessage::Completion {
            status: CompletionStatus::Failed,
            commands: None,
            final_answer: None,
            error: Some(error.into()),
        }
    }

    /// Whether the relay closes the connection after sending this message
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            ServerMessage::ExistingRun { .. }
                | ServerMessage::Completion { .. }
                | ServerMessage::Authentication {
                    status: AuthStatus::Failed,
                    ..
                }
        )
    }
}
