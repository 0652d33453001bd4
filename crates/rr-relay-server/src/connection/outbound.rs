// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-connection outbound queue
//!
//! Every frame a connection sends goes through one unbounded queue drained by
//! a single writer task, so frames leave in the order they were queued no
//! matter which task produced them.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use rr_wire_contract::{encode_server_message, ServerMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Ping,
    /// Send a close frame, then stop writing
    Close,
}

/// Cloneable handle for queueing frames on one connection
///
/// Holders never own the connection: once it is gone, sends are dropped.
#[derive(Debug, Clone)]
pub struct ConnectionSender {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
    terminated: CancellationToken,
}

impl ConnectionSender {
    /// Create a sender and the queue its writer drains.
    pub fn channel(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id,
                tx,
                terminated: CancellationToken::new(),
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message; returns false if the connection is gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        !self.is_closed() && self.tx.send(Outbound::Message(message)).is_ok()
    }

    pub fn ping(&self) -> bool {
        !self.is_closed() && self.tx.send(Outbound::Ping).is_ok()
    }

    /// Queue a close frame behind anything already queued.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// Tear the connection down without waiting for the peer.
    pub fn terminate(&self) {
        self.terminated.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.terminated.is_cancelled() || self.tx.is_closed()
    }

    pub fn terminated(&self) -> &CancellationToken {
        &self.terminated
    }
}

/// Drain `rx` into the socket until the queue closes, a close frame is sent
/// or the connection is terminated.
///
/// The connection is marked terminated on exit so the reader stops too.
pub async fn run_writer(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    sender: ConnectionSender,
) {
    let terminated = sender.terminated().clone();
    loop {
        let next = tokio::select! {
            biased;
            _ = terminated.cancelled() => break,
            next = rx.recv() => next,
        };
        let Some(frame) = next else { break };

        let ws_frame = match frame {
            Outbound::Message(message) => match encode_server_message(&message) {
                Ok(text) => WsMessage::Text(text),
                Err(err) => {
                    warn!(connection = %sender.id(), error = %err, "dropping unencodable message");
                    continue;
                }
            },
            Outbound::Ping => WsMessage::Ping(Vec::new()),
            Outbound::Close => {
                debug!(connection = %sender.id(), "closing connection");
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        };

        trace!(connection = %sender.id(), "writing frame");
        if let Err(err) = sink.send(ws_frame).await {
            debug!(connection = %sender.id(), error = %err, "socket write failed");
            break;
        }
    }
    terminated.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_are_dropped_after_termination() {
        let (sender, mut rx) = ConnectionSender::channel(ConnectionId::new());
        assert!(sender.send(ServerMessage::error("first")));
        sender.terminate();
        assert!(!sender.send(ServerMessage::error("second")));
        assert!(!sender.ping());
        assert!(sender.is_closed());

        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Message(ServerMessage::error("first"))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_queue_reads_as_closed() {
        let (sender, rx) = ConnectionSender::channel(ConnectionId::new());
        drop(rx);
        assert!(sender.is_closed());
        assert!(!sender.send(ServerMessage::auth_success()));
    }

    #[test]
    fn clones_share_termination() {
        let (sender, _rx) = ConnectionSender::channel(ConnectionId::new());
        let clone = sender.clone();
        clone.terminate();
        assert!(sender.is_closed());
        assert_eq!(sender.id(), clone.id());
    }
}
