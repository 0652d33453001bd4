// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! WebSocket connection handler
//!
//! One reader loop per socket decodes client frames and dispatches them; all
//! outgoing frames go through the connection's [`ConnectionSender`]. Runs
//! started here outlive the connection.

pub mod outbound;

pub use outbound::{run_writer, ConnectionId, ConnectionSender, Outbound};

use crate::auth::AuthGate;
use crate::controller::{self, RunController};
use crate::error::ProtocolError;
use crate::liveness::mark_alive;
use crate::registry::Acquired;
use crate::state::RelayState;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::StreamExt;
use rr_domain_types::Principal;
use rr_wire_contract::{decode_client_message, reasons, ClientMessage, Inbound, ServerMessage};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};

/// How long a closing connection waits for its queued frames to be written
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Which start message a socket accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// `/` and `/agent`: `start_agent`
    Agent,
    /// `/automation`: `start_script`
    Automation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Serve one upgraded socket until either side closes it.
///
/// `permit` is held for the lifetime of the connection.
pub async fn serve(
    socket: WebSocket,
    state: RelayState,
    channel: Channel,
    permit: OwnedSemaphorePermit,
) {
    let id = ConnectionId::new();
    let (sink, mut stream) = socket.split();
    let (sender, rx) = ConnectionSender::channel(id);
    let writer = tokio::spawn(run_writer(sink, rx, sender.clone()));
    let alive = state.liveness.register(sender.clone());
    info!(connection = %id, ?channel, "connection opened");

    let mut handler = ConnectionHandler {
        gate: AuthGate::new(Arc::clone(&state.identity)),
        state: state.clone(),
        channel,
        sender: sender.clone(),
        alive,
    };

    loop {
        let frame = tokio::select! {
            _ = sender.terminated().cancelled() => break,
            frame = stream.next() => frame,
        };

        let flow = match frame {
            Some(Ok(WsMessage::Text(text))) => handler.handle_text(&text).await,
            Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => handler.handle_text(&text).await,
                Err(_) => handler.reject_malformed("binary frame is not UTF-8"),
            },
            Some(Ok(WsMessage::Pong(_))) => {
                mark_alive(&handler.alive);
                Flow::Continue
            }
            Some(Ok(WsMessage::Ping(_))) => Flow::Continue,
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Err(err)) => {
                debug!(connection = %id, error = %err, "socket read failed");
                break;
            }
        };
        if flow == Flow::Close {
            break;
        }
    }

    state.liveness.unregister(id);
    sender.close();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        sender.terminate();
    }
    drop(permit);
    info!(connection = %id, "connection closed");
}

struct ConnectionHandler {
    state: RelayState,
    channel: Channel,
    sender: ConnectionSender,
    gate: AuthGate,
    alive: Arc<AtomicBool>,
}

impl ConnectionHandler {
    async fn handle_text(&mut self, text: &str) -> Flow {
        let inbound = match decode_client_message(text) {
            Ok(inbound) => inbound,
            Err(err) => return self.reject_malformed(ProtocolError::from(err)),
        };

        if let Inbound::Message(ClientMessage::Authenticate { token }) = &inbound {
            return self.authenticate(token).await;
        }

        let kind = match &inbound {
            Inbound::Message(message) => message.kind(),
            Inbound::Unknown(kind) => kind.as_str(),
        };
        let principal = match self.gate.require(kind) {
            Ok(principal) => principal.clone(),
            Err(err) => {
                warn!(connection = %self.sender.id(), error = %err, "rejecting message");
                self.sender
                    .send(ServerMessage::error(reasons::NOT_AUTHENTICATED));
                return Flow::Close;
            }
        };

        match inbound {
            Inbound::Message(ClientMessage::Heartbeat) => {
                debug!(connection = %self.sender.id(), "heartbeat");
                mark_alive(&self.alive);
                Flow::Continue
            }
            Inbound::Message(ClientMessage::StartAgent { run_id }) if self.channel == Channel::Agent => {
                self.start_agent(principal, &run_id).await
            }
            Inbound::Message(ClientMessage::StartScript { automation_id })
                if self.channel == Channel::Automation =>
            {
                self.start_script(principal, &automation_id).await
            }
            Inbound::Message(message) => {
                warn!(
                    connection = %self.sender.id(),
                    kind = message.kind(),
                    channel = ?self.channel,
                    "message type not served on this channel"
                );
                Flow::Continue
            }
            Inbound::Unknown(kind) => {
                warn!(connection = %self.sender.id(), %kind, "unknown message type received");
                Flow::Continue
            }
        }
    }

    /// Report an undecodable frame. Before authentication it also closes the
    /// connection.
    fn reject_malformed(&self, reason: impl std::fmt::Display) -> Flow {
        warn!(connection = %self.sender.id(), error = %reason, "failed to process message");
        self.sender
            .send(ServerMessage::error(reasons::FAILED_TO_PROCESS));
        if self.gate.is_authenticated() {
            Flow::Continue
        } else {
            Flow::Close
        }
    }

    async fn authenticate(&mut self, token: &str) -> Flow {
        match self.gate.authenticate(token).await {
            Ok(principal) => {
                info!(connection = %self.sender.id(), %principal, "client authenticated");
                self.sender.send(ServerMessage::auth_success());
                Flow::Continue
            }
            Err(err) => {
                warn!(connection = %self.sender.id(), error = %err, "authentication failed");
                self.sender.send(ServerMessage::auth_failed());
                Flow::Close
            }
        }
    }

    async fn start_agent(&self, principal: Principal, run_id: &str) -> Flow {
        info!(connection = %self.sender.id(), run_id, %principal, "starting agent run");
        let run = match self.state.store.fetch_run(run_id, &principal).await {
            Ok(run) => run,
            Err(err) => {
                warn!(run_id, error = %err, "failed to fetch run");
                self.sender
                    .send(ServerMessage::error(reasons::FAILED_TO_START));
                return Flow::Continue;
            }
        };

        if run.status.is_terminal() {
            info!(run_id, status = %run.status, "run already finished; replaying result");
            self.sender.send(ServerMessage::existing_run(&run));
            return Flow::Close;
        }

        match controller::acquire(&self.state.registry, &run.id, self.sender.clone()) {
            Ok(Acquired::Lease(lease)) => {
                RunController::new(
                    lease,
                    &run,
                    principal,
                    Arc::clone(&self.state.store),
                    Arc::clone(&self.state.executors),
                )
                .spawn();
            }
            Ok(Acquired::Observer { replayed }) => {
                info!(run_id, replayed, "attached to active run");
            }
            Err(conflict) => {
                warn!(run_id, error = %conflict, "run acquisition refused");
                self.sender
                    .send(ServerMessage::error(reasons::RUN_ALREADY_ACTIVE));
            }
        }
        Flow::Continue
    }

    async fn start_script(&self, principal: Principal, automation_id: &str) -> Flow {
        info!(connection = %self.sender.id(), automation_id, %principal, "starting automation");
        let automation = match self
            .state
            .store
            .fetch_automation(automation_id, &principal)
            .await
        {
            Ok(automation) => automation,
            Err(err) => {
                warn!(automation_id, error = %err, "failed to fetch automation");
                self.sender
                    .send(ServerMessage::error(reasons::FAILED_TO_START));
                return Flow::Continue;
            }
        };

        let key = format!("automation:{}", automation.id);
        let lease = match controller::acquire(&self.state.registry, &key, self.sender.clone()) {
            Ok(Acquired::Lease(lease)) => lease,
            Ok(Acquired::Observer { replayed }) => {
                info!(automation_id, replayed, "attached to active automation");
                return Flow::Continue;
            }
            Err(conflict) => {
                warn!(automation_id, error = %conflict, "automation acquisition refused");
                self.sender
                    .send(ServerMessage::error(reasons::RUN_ALREADY_ACTIVE));
                return Flow::Continue;
            }
        };

        let run = match self
            .state
            .store
            .create_run(&principal, &automation.objective)
            .await
        {
            Ok(run) => run,
            Err(err) => {
                warn!(automation_id, error = %err, "failed to create run for automation");
                self.sender
                    .send(ServerMessage::error(reasons::FAILED_TO_START));
                return Flow::Continue;
            }
        };

        info!(automation_id, run_id = %run.id, "automation run created");
        RunController::new(
            lease,
            &run,
            principal,
            Arc::clone(&self.state.store),
            Arc::clone(&self.state.executors),
        )
        .spawn();
        Flow::Continue
    }
}
