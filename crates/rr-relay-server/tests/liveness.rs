// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use common::{
    expect_closed, next_json, send_json, spawn_relay, three_step_script, wait_until,
    TestRelay, ALICE_TOKEN,
};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

mod common;

const PERIOD_MS: u64 = 100;

async fn relay() -> TestRelay {
    spawn_relay(|cfg| cfg.heartbeat_interval_ms = PERIOD_MS, three_step_script()).await
}

#[tokio::test]
async fn silent_peer_is_closed_within_two_periods() {
    let relay = relay().await;
    relay.seed_run("r1", "alice", "buy milk").await;
    let mut client = relay.authenticated("/agent", ALICE_TOKEN).await;
    assert_eq!(relay.state.liveness.connection_count(), 1);

    // Not reading means pings are never answered.
    sleep(Duration::from_millis(PERIOD_MS * 3)).await;

    wait_until(|| relay.state.liveness.connection_count() == 0).await;
    expect_closed(&mut client).await;
    relay.stop().await;
}

#[tokio::test]
async fn peer_answering_pings_stays_open() {
    let relay = relay().await;
    relay.seed_run("r1", "alice", "buy milk").await;
    let mut client = relay.authenticated("/agent", ALICE_TOKEN).await;

    // Reading lets the client answer each ping with a pong.
    let deadline = Instant::now() + Duration::from_millis(PERIOD_MS * 6);
    while Instant::now() < deadline {
        match timeout(Duration::from_millis(10), client.next()).await {
            Ok(Some(Ok(frame))) => assert!(frame.is_ping() || frame.is_pong(), "{frame:?}"),
            Ok(other) => panic!("connection ended: {other:?}"),
            Err(_) => {}
        }
    }

    assert_eq!(relay.state.liveness.connection_count(), 1);
    send_json(&mut client, json!({"type": "start_agent", "runId": "r1"})).await;
    assert_eq!(next_json(&mut client).await["stepNumber"], 1);
    relay.stop().await;
}

#[tokio::test]
async fn application_heartbeats_keep_a_peer_alive() {
    let relay = relay().await;
    relay.seed_run("r1", "alice", "buy milk").await;
    let mut client = relay.authenticated("/agent", ALICE_TOKEN).await;

    for _ in 0..12 {
        send_json(&mut client, json!({"type": "heartbeat"})).await;
        sleep(Duration::from_millis(PERIOD_MS / 2)).await;
    }

    assert_eq!(relay.state.liveness.connection_count(), 1);
    send_json(&mut client, json!({"type": "start_agent", "runId": "r1"})).await;
    assert_eq!(next_json(&mut client).await["stepNumber"], 1);
    relay.stop().await;
}
