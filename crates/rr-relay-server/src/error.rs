// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Relay error types

use rr_domain_types::RunStatus;
use rr_wire_contract::ContractError;

/// Relay result type
pub type RelayResult<T> = Result<T, RelayError>;

/// Top-level relay errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Run {0} is already active")]
    AcquisitionConflict(String),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Identity provider failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid authentication token")]
    InvalidToken,

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Inbound frame could not be honoured
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] ContractError),

    #[error("`{0}` received before authentication")]
    NotAuthenticated(String),
}

/// Task executor failures
///
/// `Failed` displays the executor's own message unchanged; it is what the
/// client sees in a failed `completion`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("executor initialisation failed: {0}")]
    Initialization(String),

    #[error("{0}")]
    Failed(String),

    #[error("executor I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("executor panicked: {0}")]
    Panicked(String),

    #[error("executor was closed before the task finished")]
    Closed,
}

/// Run store failures
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl PersistenceError {
    pub fn run_not_found(id: impl Into<String>) -> Self {
        PersistenceError::NotFound {
            kind: "run",
            id: id.into(),
        }
    }

    pub fn automation_not_found(id: impl Into<String>) -> Self {
        PersistenceError::NotFound {
            kind: "automation",
            id: id.into(),
        }
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        PersistenceError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Backend(format!("JSON error: {err}"))
    }
}

impl From<tokio::task::JoinError> for PersistenceError {
    fn from(err: tokio::task::JoinError) -> Self {
        PersistenceError::Backend(format!("blocking task failed: {err}"))
    }
}
