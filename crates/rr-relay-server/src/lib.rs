// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Run Relay server
//!
//! WebSocket relay that authenticates clients, starts agent runs on their
//! behalf and streams each run's steps back to the connection observing it.
//! Runs are persisted through a [`store::RunStore`] and executed by a
//! [`executor::TaskExecutor`]; both are injected, see
//! [`dependencies::DefaultRelayDependencies`] and
//! [`mock_dependencies::MockRelayDependencies`].

pub mod auth;
pub mod config;
pub mod connection;
pub mod controller;
pub mod dependencies;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod liveness;
pub mod mock_dependencies;
pub mod registry;
pub mod server;
pub mod state;
pub mod store;

pub use config::ServerConfig;
pub use error::{RelayError, RelayResult};
pub use server::RelayServer;
