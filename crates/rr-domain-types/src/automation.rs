// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use crate::run::Principal;
use serde::{Deserialize, Serialize};

/// Saved objective that can be replayed as a fresh run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Automation {
    pub id: String,
    pub owner: Principal,
    pub name: String,
    pub objective: String,
}
