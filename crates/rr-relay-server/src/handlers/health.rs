// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Health check endpoint

use crate::state::RelayState;
use axum::{extract::State, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    /// Open WebSocket connections
    pub connections: usize,
    /// Runs executing in this process
    pub active_runs: usize,
}

pub async fn health_check(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: state.liveness.connection_count(),
        active_runs: state.registry.active_count(),
    })
}
