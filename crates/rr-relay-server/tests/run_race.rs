// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use common::{
    collect_until_completion, next_json, send_json, spawn_relay, step_numbers,
    ALICE_TOKEN,
};
use rr_domain_types::RunStatus;
use rr_relay_server::executor::ScriptedRun;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

mod common;

fn held_script(release: &CancellationToken) -> ScriptedRun {
    ScriptedRun::new()
        .step("goto", "first")
        .step("click", "second")
        .hold_until(release.clone())
        .finish_with("done", vec![])
}

#[tokio::test]
async fn concurrent_starts_have_exactly_one_winner() {
    let release = CancellationToken::new();
    let relay = spawn_relay(|_| {}, held_script(&release)).await;
    relay.seed_run("r2", "alice", "race").await;

    let mut a = relay.authenticated("/agent", ALICE_TOKEN).await;
    let mut b = relay.authenticated("/agent", ALICE_TOKEN).await;

    let start = json!({"type": "start_agent", "runId": "r2"});
    tokio::join!(send_json(&mut a, start.clone()), send_json(&mut b, start));

    let (first_a, first_b) = tokio::join!(next_json(&mut a), next_json(&mut b));
    let conflict = json!({"type": "error", "error": "Run is already active"});
    let (mut winner, first_win, loser_reply) = if first_a["type"] == "step_update" {
        (a, first_a, first_b)
    } else {
        (b, first_b, first_a)
    };
    assert_eq!(loser_reply, conflict);
    assert_eq!(first_win["stepNumber"], 1);
    assert_eq!(relay.executors.created_count(), 1);

    release.cancel();
    let rest = collect_until_completion(&mut winner).await;
    assert_eq!(step_numbers(&rest), vec![2]);
    assert_eq!(rest.last().unwrap()["status"], "success");
    assert_eq!(relay.executors.created_count(), 1);
    relay.stop().await;
}

#[tokio::test]
async fn second_start_on_same_connection_conflicts() {
    let release = CancellationToken::new();
    let relay = spawn_relay(|_| {}, held_script(&release)).await;
    relay.seed_run("r2", "alice", "race").await;
    let mut client = relay.authenticated("/agent", ALICE_TOKEN).await;

    send_json(&mut client, json!({"type": "start_agent", "runId": "r2"})).await;
    assert_eq!(next_json(&mut client).await["stepNumber"], 1);
    assert_eq!(next_json(&mut client).await["stepNumber"], 2);

    send_json(&mut client, json!({"type": "start_agent", "runId": "r2"})).await;
    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "error", "error": "Run is already active"})
    );

    release.cancel();
    let rest = collect_until_completion(&mut client).await;
    assert_eq!(rest.last().unwrap()["type"], "completion");
    relay.stop().await;
}

#[tokio::test]
async fn reconnecting_client_takes_over_an_orphaned_run() {
    let release = CancellationToken::new();
    let relay = spawn_relay(|_| {}, held_script(&release)).await;
    relay.seed_run("r5", "alice", "resume me").await;

    let mut first = relay.authenticated("/agent", ALICE_TOKEN).await;
    send_json(&mut first, json!({"type": "start_agent", "runId": "r5"})).await;
    assert_eq!(next_json(&mut first).await["stepNumber"], 1);
    assert_eq!(next_json(&mut first).await["stepNumber"], 2);
    first.close(None).await.unwrap();
    drop(first);

    let mut second = relay.authenticated("/agent", ALICE_TOKEN).await;
    // The relay may not have noticed the disconnect yet.
    let mut replayed: Vec<Value> = Vec::new();
    for _ in 0..100 {
        send_json(&mut second, json!({"type": "start_agent", "runId": "r5"})).await;
        let reply = next_json(&mut second).await;
        if reply["type"] == "step_update" {
            replayed.push(reply);
            break;
        }
        assert_eq!(reply["error"], "Run is already active");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(replayed.len(), 1, "second connection never took over");
    replayed.push(next_json(&mut second).await);
    assert_eq!(step_numbers(&replayed), vec![1, 2]);

    release.cancel();
    let rest = collect_until_completion(&mut second).await;
    assert_eq!(rest.last().unwrap()["status"], "success");
    assert_eq!(relay.executors.created_count(), 1);

    relay.wait_for_status("r5", RunStatus::Completed).await;
    relay.stop().await;
}
