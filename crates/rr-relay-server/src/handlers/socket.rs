// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! WebSocket upgrade endpoints

use crate::connection::{self, Channel};
use crate::state::RelayState;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

/// `/` and `/agent`
pub async fn agent_socket(State(state): State<RelayState>, ws: WebSocketUpgrade) -> Response {
    upgrade(state, ws, Channel::Agent)
}

/// `/automation`
pub async fn automation_socket(State(state): State<RelayState>, ws: WebSocketUpgrade) -> Response {
    upgrade(state, ws, Channel::Automation)
}

fn upgrade(state: RelayState, ws: WebSocketUpgrade, channel: Channel) -> Response {
    if state.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    // Connection limit
    let permit = match Arc::clone(&state.permits).try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!(
                limit = state.config.connection_limit,
                "connection limit reached; refusing upgrade"
            );
            return (StatusCode::TOO_MANY_REQUESTS, "connection limit reached").into_response();
        }
    };

    ws.on_upgrade(move |socket| connection::serve(socket, state, channel, permit))
}
