// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rr_domain_types::{Principal, RunRecord, RunStatus};
use rr_relay_server::executor::{ScriptedExecutorFactory, ScriptedRun};
use rr_relay_server::mock_dependencies::MockRelayDependencies;
use rr_relay_server::state::RelayState;
use rr_relay_server::store::InMemoryRunStore;
use rr_relay_server::{RelayResult, RelayServer, ServerConfig};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const ALICE_TOKEN: &str = "token-alice";
pub const BOB_TOKEN: &str = "token-bob";

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay running on an ephemeral port with mock dependencies
pub struct TestRelay {
    pub addr: std::net::SocketAddr,
    pub state: RelayState,
    pub store: Arc<InMemoryRunStore>,
    pub executors: Arc<ScriptedExecutorFactory>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<RelayResult<()>>,
}

impl TestRelay {
    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect(&self, path: &str) -> Client {
        let (client, _) = tokio_tungstenite::connect_async(self.url(path))
            .await
            .expect("connect");
        client
    }

    /// Connect to `path` and authenticate with `token`.
    pub async fn authenticated(&self, path: &str, token: &str) -> Client {
        let mut client = self.connect(path).await;
        authenticate(&mut client, token).await;
        client
    }

    pub async fn seed_run(&self, id: &str, owner: &str, objective: &str) {
        self.store
            .insert_run(RunRecord::pending(id, Principal::new(owner), objective))
            .await;
    }

    pub async fn wait_for_status(&self, run_id: &str, status: RunStatus) {
        wait_for_status(&self.store, run_id, status).await
    }

    /// Wait until no run is executing.
    pub async fn wait_until_idle(&self) {
        wait_until(|| self.state.registry.active_count() == 0).await
    }

    pub async fn status_of(&self, run_id: &str) -> RunStatus {
        self.store.snapshot(run_id).await.expect("run exists").status
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        timeout(READ_TIMEOUT, self.handle)
            .await
            .expect("relay should stop")
            .expect("relay task")
            .expect("relay run");
    }
}

pub fn base_config() -> ServerConfig {
    let mut config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    };
    config
        .identity
        .static_tokens
        .insert(ALICE_TOKEN.into(), "alice".into());
    config
        .identity
        .static_tokens
        .insert(BOB_TOKEN.into(), "bob".into());
    config
}

/// Spawn a relay with optional config mutation and the given default script.
pub async fn spawn_relay(configure: impl FnOnce(&mut ServerConfig), script: ScriptedRun) -> TestRelay {
    let mut config = base_config();
    configure(&mut config);

    spawn_with(MockRelayDependencies::new(config).with_script(script)).await
}

/// Spawn a relay around already-configured mock dependencies.
pub async fn spawn_with(deps: MockRelayDependencies) -> TestRelay {
    let store = deps.store();
    let executors = deps.executors();
    let state = deps.into_state();

    let server = RelayServer::with_state(state.clone()).await.expect("server");
    let addr = server.local_addr().expect("addr");
    let shutdown = server.shutdown_handle();
    let handle = tokio::spawn(server.run());

    TestRelay {
        addr,
        state,
        store,
        executors,
        shutdown,
        handle,
    }
}

/// Convenience: spawn with defaults and a three-step script.
pub async fn spawn_relay_basic() -> TestRelay {
    spawn_relay(|_| {}, three_step_script()).await
}

pub fn three_step_script() -> ScriptedRun {
    ScriptedRun::new()
        .step("goto", "open the shop")
        .step("click", "add to cart")
        .step("click", "checkout")
        .finish_with("order placed", vec![json!({"type": "click", "selector": "#buy"})])
}

pub async fn send_json(client: &mut Client, value: Value) {
    client
        .send(WsMessage::Text(value.to_string()))
        .await
        .expect("send");
}

pub async fn send_text(client: &mut Client, text: &str) {
    client
        .send(WsMessage::Text(text.to_string()))
        .await
        .expect("send");
}

pub async fn authenticate(client: &mut Client, token: &str) {
    send_json(client, json!({"type": "authenticate", "token": token})).await;
    let reply = next_json(client).await;
    assert_eq!(reply, json!({"type": "authentication", "status": "success"}));
}

/// Next JSON text frame, skipping ping/pong. Panics on close or timeout.
pub async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = timeout(READ_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame");
        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                return serde_json::from_str(&text).expect("server sent invalid JSON")
            }
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Next JSON frame, or `None` if the connection closes first.
pub async fn next_json_or_close(client: &mut Client) -> Option<Value> {
    loop {
        let frame = timeout(READ_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame");
        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                return Some(serde_json::from_str(&text).expect("server sent invalid JSON"))
            }
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(other)) => panic!("unexpected frame {other:?}"),
        }
    }
}

/// Assert the server closes the connection without sending more text.
pub async fn expect_closed(client: &mut Client) {
    if let Some(value) = next_json_or_close(client).await {
        panic!("expected the connection to close, got {value}");
    }
}

/// Frames up to and including `completion`.
pub async fn collect_until_completion(client: &mut Client) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let frame = next_json(client).await;
        let done = frame["type"] == "completion";
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

pub fn step_numbers(frames: &[Value]) -> Vec<u64> {
    frames
        .iter()
        .filter(|f| f["type"] == "step_update")
        .map(|f| f["stepNumber"].as_u64().expect("stepNumber"))
        .collect()
}

/// Poll `check` until it holds or the read timeout passes.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `run_id` is persisted with `status`.
pub async fn wait_for_status(store: &InMemoryRunStore, run_id: &str, status: RunStatus) {
    let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
    loop {
        let current = store.snapshot(run_id).await.map(|run| run.status);
        if current == Some(status) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run {run_id} stuck at {current:?}, expected {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
