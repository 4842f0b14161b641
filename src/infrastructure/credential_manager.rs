//! # ERP OAuth Credential Manager
//!
//! Owns the access/refresh token pair of one external-account scope.
//!
//! - Tokens expiring within the configured buffer (or with no known expiry)
//!   are refreshed before being handed out.
//! - A 401 from the ERP triggers `force_refresh` with the token that was
//!   rejected; if another caller already replaced it, the newer token is
//!   returned without a second refresh.
//! - All refreshes for the scope run under one async mutex, so concurrent
//!   callers wait for the in-flight refresh instead of spending the
//!   (single-use) refresh token again.
//! - A refreshed pair is persisted through the `CredentialStore` before the
//!   new access token is returned.

use crate::domain::entities::credential::{ClientCredentials, RefreshedTokens, TokenPair};
use crate::domain::errors::CredentialError;
use crate::domain::repositories::credential_store::CredentialStore;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Provider side of the refresh-token grant.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(
        &self,
        client: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, CredentialError>;
}

/// Source of valid bearer tokens for the gateway.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn valid_token(&self) -> Result<Zeroizing<String>, CredentialError>;

    /// Called after `rejected` was answered with 401.
    async fn force_refresh(&self, rejected: &str) -> Result<Zeroizing<String>, CredentialError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

/// HTTP token endpoint: `grant_type=refresh_token` with client basic auth.
pub struct OAuthTokenEndpoint {
    client: Client,
    token_url: String,
}

impl OAuthTokenEndpoint {
    pub fn new(token_url: &str, timeout: Duration) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CredentialError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            token_url: token_url.to_string(),
        })
    }
}

#[async_trait]
impl TokenEndpoint for OAuthTokenEndpoint {
    async fn refresh(
        &self,
        client: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, CredentialError> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&client.client_id, Some(client.client_secret.as_str()))
            .header("Accept", "application/json")
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await
            .map_err(|e| CredentialError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::MalformedResponse(e.to_string()))?;

        if parsed.access_token.is_empty() {
            return Err(CredentialError::MalformedResponse(
                "empty access_token".to_string(),
            ));
        }

        // Providers that do not rotate keep the current refresh token valid.
        let next_refresh = parsed
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| refresh_token.to_string());

        Ok(RefreshedTokens {
            access_token: Zeroizing::new(parsed.access_token),
            refresh_token: Zeroizing::new(next_refresh),
            expires_in_secs: parsed.expires_in,
        })
    }
}

pub struct CredentialManager {
    scope: String,
    client: ClientCredentials,
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn CredentialStore>,
    expiry_buffer: chrono::Duration,
    /// `None` until loaded from the store.
    current: Mutex<Option<TokenPair>>,
}

impl CredentialManager {
    pub fn new(
        scope: &str,
        client: ClientCredentials,
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<dyn CredentialStore>,
        expiry_buffer: Duration,
    ) -> Self {
        Self {
            scope: scope.to_string(),
            client,
            endpoint,
            store,
            expiry_buffer: chrono::Duration::from_std(expiry_buffer)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            current: Mutex::new(None),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Stores a refresh token for the scope when none is persisted yet.
    /// The first call after seeding refreshes, since the seed carries no expiry.
    pub async fn seed_if_empty(&self, refresh_token: Zeroizing<String>) -> Result<bool, CredentialError> {
        let mut current = self.current.lock().await;
        if self.store.load(&self.scope).await?.is_some() {
            return Ok(false);
        }
        let seed = TokenPair {
            access_token: Zeroizing::new(String::new()),
            refresh_token,
            expires_at: None,
        };
        self.store.save(&self.scope, &seed).await?;
        *current = Some(seed);
        info!("Seeded refresh token for credential scope '{}'", self.scope);
        Ok(true)
    }

    async fn load_locked(&self, current: &mut Option<TokenPair>) -> Result<(), CredentialError> {
        if current.is_none() {
            match self.store.load(&self.scope).await? {
                Some(pair) => *current = Some(pair),
                None => return Err(CredentialError::MissingField("refresh_token")),
            }
        }
        Ok(())
    }

    /// Exchanges the refresh token and persists the new pair. Caller holds the lock.
    async fn refresh_locked(
        &self,
        current: &mut Option<TokenPair>,
    ) -> Result<Zeroizing<String>, CredentialError> {
        if self.client.client_id.trim().is_empty() {
            return Err(CredentialError::MissingField("client_id"));
        }
        if self.client.client_secret.trim().is_empty() {
            return Err(CredentialError::MissingField("client_secret"));
        }
        let refresh_token = current
            .as_ref()
            .map(|pair| pair.refresh_token.clone())
            .filter(|token| !token.trim().is_empty())
            .ok_or(CredentialError::MissingField("refresh_token"))?;

        debug!("Refreshing ERP access token for scope '{}'", self.scope);
        let refreshed = self
            .endpoint
            .refresh(&self.client, refresh_token.as_str())
            .await
            .map_err(|e| {
                error!("Token refresh failed for scope '{}': {}", self.scope, e);
                e
            })?;

        let pair = refreshed.into_pair(Utc::now());
        let access = pair.access_token.clone();

        // The old refresh token is spent; keep the new pair even if persisting fails.
        *current = Some(pair.clone());
        self.store.save(&self.scope, &pair).await.map_err(|e| {
            error!(
                "Refreshed tokens for scope '{}' could not be persisted: {}",
                self.scope, e
            );
            CredentialError::Persistence(e.to_string())
        })?;

        info!(
            "ERP access token refreshed for scope '{}' (expires at {:?})",
            self.scope, pair.expires_at
        );
        Ok(access)
    }
}

#[async_trait]
impl TokenProvider for CredentialManager {
    async fn valid_token(&self) -> Result<Zeroizing<String>, CredentialError> {
        let mut current = self.current.lock().await;
        self.load_locked(&mut current).await?;

        let needs_refresh = current
            .as_ref()
            .map_or(true, |pair| {
                pair.access_token.is_empty() || pair.expires_within(self.expiry_buffer, Utc::now())
            });

        if needs_refresh {
            return self.refresh_locked(&mut current).await;
        }

        current
            .as_ref()
            .map(|pair| pair.access_token.clone())
            .ok_or(CredentialError::MissingField("access_token"))
    }

    async fn force_refresh(&self, rejected: &str) -> Result<Zeroizing<String>, CredentialError> {
        let mut current = self.current.lock().await;
        self.load_locked(&mut current).await?;

        if let Some(pair) = current.as_ref() {
            if !pair.access_token.is_empty() && pair.access_token.as_str() != rejected {
                debug!("Token already replaced by a concurrent refresh");
                return Ok(pair.access_token.clone());
            }
        }

        warn!("ERP rejected access token for scope '{}', forcing refresh", self.scope);
        self.refresh_locked(&mut current).await
    }
}
