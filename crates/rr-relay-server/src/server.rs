// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Main server implementation

use crate::dependencies::DefaultRelayDependencies;
use crate::error::RelayResult;
use crate::handlers;
use crate::{config::ServerConfig, state::RelayState};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Run Relay server
///
/// The listener is bound on construction so callers can read the address
/// before [`RelayServer::run`] starts serving.
pub struct RelayServer {
    state: RelayState,
    listener: TcpListener,
    app: Router,
}

impl RelayServer {
    /// Create a server with the production dependencies
    pub async fn new(config: ServerConfig) -> RelayResult<Self> {
        let state = DefaultRelayDependencies::new(config)?.into_state();
        Self::with_state(state).await
    }

    /// Construct a server from an already-built state (used for custom dependencies)
    pub async fn with_state(state: RelayState) -> RelayResult<Self> {
        let listener = TcpListener::bind(state.config.bind_addr).await?;
        let app = Self::build_app(state.clone());
        Ok(Self {
            state,
            listener,
            app,
        })
    }

    /// Build the Axum application with routes and middleware
    pub fn build_app(state: RelayState) -> Router {
        let middleware_stack = ServiceBuilder::new().layer(TraceLayer::new_for_http());

        Router::new()
            .route("/", get(handlers::socket::agent_socket))
            .route("/agent", get(handlers::socket::agent_socket))
            .route("/automation", get(handlers::socket::automation_socket))
            .route("/healthz", get(handlers::health::health_check))
            .with_state(state)
            .layer(middleware_stack)
    }

    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Cancelling the returned token shuts the server down.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Serve until the shutdown token is cancelled.
    ///
    /// Shutdown order: stop the liveness monitor, close every active
    /// executor and clear the registry, terminate open connections, then
    /// stop accepting.
    pub async fn run(self) -> RelayResult<()> {
        let Self {
            state,
            listener,
            app,
        } = self;
        info!(addr = %listener.local_addr()?, "relay listening");

        let monitor_stop = CancellationToken::new();
        let monitor = tokio::spawn(Arc::clone(&state.liveness).run(monitor_stop.clone()));

        let shutdown = async move {
            state.shutdown.cancelled().await;
            info!("shutdown requested");

            monitor_stop.cancel();
            if let Err(err) = monitor.await {
                tracing::warn!(error = %err, "liveness monitor ended abnormally");
            }
            let released = state.registry.shutdown().await;
            let terminated = state.liveness.terminate_all();
            info!(released, terminated, "relay drained");
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("relay stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_dependencies::MockRelayDependencies;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn healthz_reports_counts() {
        let state = MockRelayDependencies::new(test_config()).into_state();
        let app = RelayServer::build_app(state);

        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 0);
        assert_eq!(json["activeRuns"], 0);
    }

    #[tokio::test]
    async fn plain_get_on_socket_route_is_rejected() {
        let state = MockRelayDependencies::new(test_config()).into_state();
        let app = RelayServer::build_app(state);

        let response = app
            .oneshot(Request::get("/agent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn run_returns_after_shutdown() {
        let state = MockRelayDependencies::new(test_config()).into_state();
        let server = RelayServer::with_state(state).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let shutdown = server.shutdown_handle();
        let running = tokio::spawn(server.run());
        shutdown.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(5), running)
            .await
            .expect("server should stop")
            .unwrap()
            .unwrap();
    }
}
