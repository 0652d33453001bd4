// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Dependency wiring for the relay server

use crate::{
    auth::provider_from_config,
    config::ServerConfig,
    error::RelayResult,
    executor::{ExecutorFactory, ProcessExecutorFactory},
    state::RelayState,
    store::{RunStore, SqliteRunStore},
};
use std::sync::Arc;
use tracing::info;

/// Production wiring: configured identity provider, SQLite run store and
/// process executors
pub struct DefaultRelayDependencies {
    state: RelayState,
}

impl DefaultRelayDependencies {
    pub fn new(config: ServerConfig) -> RelayResult<Self> {
        let executors = Arc::new(ProcessExecutorFactory::from_config(&config.executor)?);
        Self::with_executors(config, executors)
    }

    /// Same wiring with a caller-supplied executor factory (`--demo`).
    pub fn with_executors(
        config: ServerConfig,
        executors: Arc<dyn ExecutorFactory>,
    ) -> RelayResult<Self> {
        let identity = provider_from_config(&config.identity)?;

        let store: Arc<dyn RunStore> = if config.database_path == ":memory:" {
            Arc::new(SqliteRunStore::open_in_memory()?)
        } else {
            Arc::new(SqliteRunStore::open(&config.database_path)?)
        };
        info!(database = %config.database_path, "run store opened");

        Ok(Self {
            state: RelayState::new(config, identity, store, executors),
        })
    }

    /// Consume the dependency builder and return the resulting state
    pub fn into_state(self) -> RelayState {
        self.state
    }
}
