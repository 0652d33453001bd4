// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server configuration

use crate::error::{RelayError, RelayResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,

    /// Path to SQLite database (`:memory:` for a throwaway store)
    pub database_path: String,

    /// Identity provider used by the authentication gate
    pub identity: IdentityConfig,

    /// Liveness probe period in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Maximum concurrent WebSocket connections
    pub connection_limit: usize,

    /// External task executor
    pub executor: ExecutorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            database_path: ":memory:".to_string(),
            identity: IdentityConfig::default(),
            heartbeat_interval_ms: 30_000,
            connection_limit: 256,
            executor: ExecutorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a configuration file, filling omitted keys with defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> RelayResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|err| RelayError::Config(format!("{}: {err}", path.display())))
    }

    pub fn from_toml_str(text: &str) -> RelayResult<Self> {
        toml::from_str(text).map_err(|err| RelayError::Config(err.to_string()))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

/// Identity provider selection
///
/// The first configured provider wins, in the order JWT secret, remote
/// identity service, static tokens.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    /// Shared secret for HS256 JWT validation
    pub jwt_secret: Option<String>,

    /// Base URL of a remote identity service (`{url}/auth/v1/user`)
    pub url: Option<String>,

    /// API key sent to the remote identity service
    pub api_key: Option<String>,

    /// Fixed token → principal table for local development
    pub static_tokens: HashMap<String, String>,
}

/// External executor process
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Program to launch per run; the objective is appended as last argument
    pub command: Option<String>,

    /// Arguments placed before the objective
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:3001".parse().unwrap());
        assert_eq!(config.database_path, ":memory:");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.connection_limit, 256);
        assert!(config.identity.jwt_secret.is_none());
        assert!(config.executor.command.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            heartbeat_interval_ms = 500

            [identity]
            jwt_secret = "s3cret"

            [executor]
            command = "browser-agent"
            args = ["--headless"]
            "#,
        )
        .unwrap();

        assert_eq!(config.heartbeat_interval(), Duration::from_millis(500));
        assert_eq!(config.identity.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.executor.command.as_deref(), Some("browser-agent"));
        assert_eq!(config.executor.args, vec!["--headless".to_string()]);
        assert_eq!(config.connection_limit, 256);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ServerConfig::from_toml_str("heartbeat = 5").unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bind_addr = \"0.0.0.0:9000\"\n[identity.static_tokens]\ndev = \"user-1\""
        )
        .unwrap();

        let config = ServerConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(
            config.identity.static_tokens.get("dev").map(String::as_str),
            Some("user-1")
        );
    }
}
