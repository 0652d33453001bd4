// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Dependency wiring for tests and local development
//!
//! In-memory run store, scripted executors and a static token table. The
//! store and executor factory stay reachable after the state is built so
//! tests can seed runs and inspect what the relay did.

use crate::{
    auth::{IdentityProvider, StaticIdentityProvider},
    config::ServerConfig,
    executor::{ScriptedExecutorFactory, ScriptedRun},
    state::RelayState,
    store::InMemoryRunStore,
};
use std::sync::Arc;

pub struct MockRelayDependencies {
    config: ServerConfig,
    store: Arc<InMemoryRunStore>,
    executors: Arc<ScriptedExecutorFactory>,
    tokens: StaticIdentityProvider,
    identity: Option<Arc<dyn IdentityProvider>>,
}

impl MockRelayDependencies {
    /// Tokens listed in `config.identity.static_tokens` are accepted.
    pub fn new(config: ServerConfig) -> Self {
        let tokens = StaticIdentityProvider::from_pairs(
            config
                .identity
                .static_tokens
                .iter()
                .map(|(token, principal)| (token.clone(), principal.clone())),
        );
        Self {
            config,
            store: Arc::new(InMemoryRunStore::new()),
            executors: Arc::new(ScriptedExecutorFactory::new(ScriptedRun::default())),
            tokens,
            identity: None,
        }
    }

    pub fn with_token(mut self, token: &str, principal: &str) -> Self {
        self.tokens = self.tokens.with_token(token, principal);
        self
    }

    /// Replace the static token table with another provider
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Script used for every run without an objective-specific script
    pub fn with_script(self, script: ScriptedRun) -> Self {
        self.executors.set_script(script);
        self
    }

    pub fn store(&self) -> Arc<InMemoryRunStore> {
        Arc::clone(&self.store)
    }

    pub fn executors(&self) -> Arc<ScriptedExecutorFactory> {
        Arc::clone(&self.executors)
    }

    pub fn into_state(self) -> RelayState {
        let identity: Arc<dyn IdentityProvider> = match self.identity {
            Some(identity) => identity,
            None => Arc::new(self.tokens),
        };
        RelayState::new(self.config, identity, self.store, self.executors)
    }
}
