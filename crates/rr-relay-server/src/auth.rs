// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Authentication gate and identity providers
//!
//! A connection is unauthenticated until its `authenticate` frame carries a
//! token the configured [`IdentityProvider`] accepts. The gate remembers the
//! resulting principal; a later `authenticate` re-validates from scratch.

use crate::config::IdentityConfig;
use crate::error::{AuthError, ProtocolError, RelayError, RelayResult};
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use rr_domain_types::Principal;
use rr_logging::redact;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Resolves bearer tokens to principals
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Principal, AuthError>;
}

/// Build the provider selected by the identity configuration
pub fn provider_from_config(config: &IdentityConfig) -> RelayResult<Arc<dyn IdentityProvider>> {
    if let Some(secret) = &config.jwt_secret {
        return Ok(Arc::new(JwtIdentityProvider::new(secret)));
    }
    if let Some(url) = &config.url {
        return Ok(Arc::new(HttpIdentityProvider::new(
            url,
            config.api_key.clone(),
        )?));
    }
    if !config.static_tokens.is_empty() {
        return Ok(Arc::new(StaticIdentityProvider::from_pairs(
            config.static_tokens.iter().map(|(k, v)| (k.clone(), v.clone())),
        )));
    }
    Err(RelayError::Config(
        "no identity provider configured (set identity.jwt_secret, identity.url or identity.static_tokens)"
            .to_string(),
    ))
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub exp: usize,  // Expiration time
}

/// Validates HS256 tokens locally with a shared secret
pub struct JwtIdentityProvider {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|err| {
            debug!(error = %err, "JWT rejected");
            AuthError::InvalidToken
        })?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(Principal::new(data.claims.sub))
    }
}

#[derive(Deserialize)]
struct UserReply {
    id: Option<String>,
}

/// Delegates token checks to a remote identity service
///
/// Calls `GET {base_url}/auth/v1/user` with the token as bearer credentials
/// and takes the principal from the `id` field of the reply.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpIdentityProvider {
    pub fn new(base_url: &str, api_key: Option<String>) -> RelayResult<Self> {
        let endpoint = Url::parse(&format!("{}/auth/v1/user", base_url.trim_end_matches('/')))
            .map_err(|err| RelayError::Config(format!("invalid identity url {base_url}: {err}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        let mut request = self.client.get(self.endpoint.clone()).bearer_auth(token);
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key);
        }

        let response = request.send().await.map_err(|err| {
            warn!(error = %err, endpoint = %self.endpoint, "identity service unreachable");
            AuthError::Unavailable(err.to_string())
        })?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "identity service rejected token");
            return Err(AuthError::InvalidToken);
        }

        let reply: UserReply = response.json().await.map_err(|err| {
            warn!(error = %err, "identity service returned an unreadable reply");
            AuthError::InvalidToken
        })?;

        match reply.id {
            Some(id) if !id.is_empty() => Ok(Principal::new(id)),
            _ => Err(AuthError::InvalidToken),
        }
    }
}

/// Fixed token table, for local development and tests
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, Principal>,
}

impl StaticIdentityProvider {
    pub fn from_pairs<I, T, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (T, P)>,
        T: Into<String>,
        P: Into<String>,
    {
        Self {
            tokens: pairs
                .into_iter()
                .map(|(token, principal)| (token.into(), Principal::new(principal)))
                .collect(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, principal: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), Principal::new(principal));
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

/// Per-connection authentication state
pub struct AuthGate {
    provider: Arc<dyn IdentityProvider>,
    principal: Option<Principal>,
}

impl AuthGate {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            principal: None,
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    /// Validate `token`, replacing any earlier principal.
    ///
    /// A failed attempt leaves the gate unauthenticated even if an earlier
    /// token had been accepted.
    pub async fn authenticate(&mut self, token: &str) -> Result<Principal, AuthError> {
        self.principal = None;
        debug!(token = %redact(token), "validating token");
        let principal = self.provider.authenticate(token).await?;
        self.principal = Some(principal.clone());
        Ok(principal)
    }

    /// Principal for a message of type `kind`, or the protocol error to report.
    pub fn require(&self, kind: &str) -> Result<&Principal, ProtocolError> {
        self.principal
            .as_ref()
            .ok_or_else(|| ProtocolError::NotAuthenticated(kind.to_string()))
    }
}
