// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Run records and their status lifecycle

use crate::step::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated identity that owns runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Run status
///
/// Serialises lower-case on the wire (`"inprogress"`); `Display`/`FromStr`
/// use the upper-case form kept in the run store (`"INPROGRESS"`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    /// `Completed` and `Failed` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Whether a run in `self` may be moved to `next`.
    ///
    /// `Pending → InProgress → {Completed, Failed}`. Re-asserting
    /// `InProgress` is allowed so a stale run can be claimed again after a
    /// restart; nothing leaves a terminal status.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Pending, RunStatus::InProgress) => true,
            (RunStatus::InProgress, RunStatus::InProgress) => true,
            (RunStatus::InProgress, RunStatus::Completed | RunStatus::Failed) => true,
            // Initialisation can fail before the run was ever marked in progress.
            (RunStatus::Pending, RunStatus::Failed) => true,
            _ => false,
        }
    }
}

/// Persisted view of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub owner: Principal,
    pub objective: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    /// New pending run with no history
    pub fn pending(id: impl Into<String>, owner: Principal, objective: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner,
            objective: objective.into(),
            status: RunStatus::Pending,
            started_at: None,
            completed_at: None,
            steps: Vec::new(),
            final_answer: None,
            error: None,
        }
    }

    /// Text reported to clients as the run's final answer
    ///
    /// Failed runs report their error when no answer was recorded.
    pub fn reported_answer(&self) -> Option<String> {
        self.final_answer.clone().or_else(|| match self.status {
            RunStatus::Failed => self.error.clone(),
            _ => None,
        })
    }
}
