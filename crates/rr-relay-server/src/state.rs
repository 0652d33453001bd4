// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server state management

use crate::auth::IdentityProvider;
use crate::config::ServerConfig;
use crate::executor::ExecutorFactory;
use crate::liveness::LivenessMonitor;
use crate::registry::RunRegistry;
use crate::store::RunStore;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Shared server state
#[derive(Clone)]
pub struct RelayState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn RunStore>,
    pub executors: Arc<dyn ExecutorFactory>,

    /// Runs executing in this process
    pub registry: Arc<RunRegistry>,

    pub liveness: Arc<LivenessMonitor>,

    /// One permit per open WebSocket
    pub permits: Arc<Semaphore>,

    /// Cancelled to begin the ordered shutdown
    pub shutdown: CancellationToken,
}

impl RelayState {
    pub fn new(
        config: ServerConfig,
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn RunStore>,
        executors: Arc<dyn ExecutorFactory>,
    ) -> Self {
        Self {
            liveness: Arc::new(LivenessMonitor::new(config.heartbeat_interval())),
            permits: Arc::new(Semaphore::new(config.connection_limit)),
            config: Arc::new(config),
            identity,
            store,
            executors,
            registry: Arc::new(RunRegistry::new()),
            shutdown: CancellationToken::new(),
        }
    }
}
