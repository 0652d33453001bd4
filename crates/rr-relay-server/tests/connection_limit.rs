// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use common::{spawn_relay, three_step_script, wait_until, ALICE_TOKEN};
use tokio_tungstenite::tungstenite::Error as WsError;

mod common;

#[tokio::test]
async fn excess_connections_get_429() {
    let relay = spawn_relay(|cfg| cfg.connection_limit = 1, three_step_script()).await;

    let first = relay.authenticated("/agent", ALICE_TOKEN).await;

    match tokio_tungstenite::connect_async(relay.url("/agent")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 429),
        other => panic!("expected HTTP 429, got {other:?}"),
    }

    drop(first);
    wait_until(|| relay.state.permits.available_permits() == 1).await;
    let _again = relay.authenticated("/automation", ALICE_TOKEN).await;

    relay.stop().await;
}
