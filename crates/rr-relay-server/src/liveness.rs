// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Heartbeat-based liveness monitor
//!
//! Each tick, a connection that has not answered since the previous tick is
//! terminated; every other connection is marked unanswered and pinged. A pong
//! or an application `heartbeat` marks it answered again.

use crate::connection::{ConnectionId, ConnectionSender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Tracked {
    alive: Arc<AtomicBool>,
    sender: ConnectionSender,
}

/// Tracks every open connection
pub struct LivenessMonitor {
    period: Duration,
    connections: Mutex<HashMap<ConnectionId, Tracked>>,
}

impl LivenessMonitor {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a connection; the returned flag starts out alive.
    pub fn register(&self, sender: ConnectionSender) -> Arc<AtomicBool> {
        let alive = Arc::new(AtomicBool::new(true));
        if let Ok(mut connections) = self.connections.lock() {
            connections.insert(
                sender.id(),
                Tracked {
                    alive: Arc::clone(&alive),
                    sender,
                },
            );
        }
        alive
    }

    pub fn unregister(&self, id: ConnectionId) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.remove(&id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Run one probe round. Returns the connections that were terminated.
    pub fn tick(&self) -> Vec<ConnectionId> {
        let Ok(mut connections) = self.connections.lock() else {
            return Vec::new();
        };

        let mut dead = Vec::new();
        connections.retain(|id, tracked| {
            if tracked.alive.swap(false, Ordering::SeqCst) {
                tracked.sender.ping()
            } else {
                info!(connection = %id, "terminating unresponsive connection");
                tracked.sender.terminate();
                dead.push(*id);
                false
            }
        });
        dead
    }

    /// Terminate every tracked connection (shutdown).
    pub fn terminate_all(&self) -> usize {
        let Ok(mut connections) = self.connections.lock() else {
            return 0;
        };
        let count = connections.len();
        for tracked in connections.values() {
            tracked.sender.terminate();
        }
        connections.clear();
        count
    }

    /// Probe every `period` until `stop` is cancelled.
    pub async fn run(self: Arc<Self>, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let dead = self.tick();
                    if !dead.is_empty() {
                        debug!(count = dead.len(), "liveness round terminated connections");
                    }
                }
            }
        }
        debug!("liveness monitor stopped");
    }
}

/// Mark a connection as answered
pub fn mark_alive(alive: &AtomicBool) {
    alive.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;

    #[test]
    fn silent_connection_is_terminated_on_second_tick() {
        let monitor = LivenessMonitor::new(Duration::from_secs(30));
        let (sender, mut rx) = ConnectionSender::channel(ConnectionId::new());
        let _alive = monitor.register(sender.clone());

        assert!(monitor.tick().is_empty());
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);

        assert_eq!(monitor.tick(), vec![sender.id()]);
        assert!(sender.is_closed());
        assert_eq!(monitor.connection_count(), 0);
    }

    #[test]
    fn answering_connection_survives() {
        let monitor = LivenessMonitor::new(Duration::from_secs(30));
        let (sender, _rx) = ConnectionSender::channel(ConnectionId::new());
        let alive = monitor.register(sender.clone());

        for _ in 0..5 {
            assert!(monitor.tick().is_empty());
            mark_alive(&alive);
        }
        assert!(!sender.is_closed());
        assert_eq!(monitor.connection_count(), 1);
    }

    #[test]
    fn connection_whose_queue_is_gone_is_dropped() {
        let monitor = LivenessMonitor::new(Duration::from_secs(30));
        let (sender, rx) = ConnectionSender::channel(ConnectionId::new());
        monitor.register(sender);
        drop(rx);

        monitor.tick();
        assert_eq!(monitor.connection_count(), 0);
    }

    #[test]
    fn terminate_all_closes_everything() {
        let monitor = LivenessMonitor::new(Duration::from_secs(30));
        let senders: Vec<_> = (0..3)
            .map(|_| {
                let (sender, rx) = ConnectionSender::channel(ConnectionId::new());
                std::mem::forget(rx);
                monitor.register(sender.clone());
                sender
            })
            .collect();

        assert_eq!(monitor.terminate_all(), 3);
        assert!(senders.iter().all(ConnectionSender::is_closed));
        assert_eq!(monitor.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_stops_on_cancel() {
        let monitor = Arc::new(LivenessMonitor::new(Duration::from_millis(50)));
        let (sender, _rx) = ConnectionSender::channel(ConnectionId::new());
        monitor.register(sender.clone());

        let stop = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&monitor).run(stop.clone()));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(sender.is_closed(), "silent connection should be gone after two ticks");

        stop.cancel();
        task.await.unwrap();
    }
}
