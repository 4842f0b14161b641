//! # Rate-Limited ERP Gateway
//!
//! Single chokepoint for every outbound ERP call.
//!
//! - Calls are spaced by at least `min_interval`; callers queue on the throttle.
//! - 401: one forced token refresh, one retry, then `GatewayError::Auth`.
//! - 429: backoff of `step × attempt` capped at the ceiling, up to
//!   `max_attempts` responses, then `GatewayError::RateLimitExceeded`.
//! - 404: `Lookup::NotFound` for optional lookups, `ExternalApi` otherwise.
//! - Anything else non-2xx: `ExternalApi { status, body }`, never retried.

use crate::config::GatewayConfig;
use crate::domain::errors::GatewayError;
use crate::domain::repositories::erp_api::Lookup;
use crate::infrastructure::credential_manager::TokenProvider;
use crate::rate_limit::OutboundThrottle;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest error body kept in `ExternalApi`.
const MAX_ERROR_BODY: usize = 2048;

pub struct ErpGateway {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    throttle: OutboundThrottle,
    config: GatewayConfig,
}

impl std::fmt::Debug for ErpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErpGateway")
            .field("base_url", &self.base_url)
            .field("min_interval", &self.throttle.min_interval())
            .field("max_attempts", &self.config.max_attempts)
            .finish()
    }
}

impl ErpGateway {
    pub fn new(config: GatewayConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .user_agent(concat!("ledgersync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
            throttle: OutboundThrottle::new(config.min_interval),
            config,
        })
    }

    /// Call where a 404 is an error.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, GatewayError> {
        match self.send(method, path, query, body, false).await? {
            Lookup::Found(value) => Ok(value),
            Lookup::NotFound => Err(GatewayError::ExternalApi {
                status: StatusCode::NOT_FOUND.as_u16(),
                body: String::new(),
            }),
        }
    }

    /// GET where a 404 means "does not exist (yet)".
    pub async fn get_optional(&self, path: &str, query: &[(&str, String)]) -> Result<Lookup<Value>, GatewayError> {
        self.send(Method::GET, path, query, None, true).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        not_found_is_value: bool,
    ) -> Result<Lookup<Value>, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let mut token = self.tokens.valid_token().await?;
        let mut refreshed = false;
        let mut rate_limited = 0u32;

        loop {
            self.throttle.acquire().await;
            debug!("ERP {} {}", method, path);

            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(token.as_str())
                .header("Accept", "application/json");
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| GatewayError::Transport(format!("{} {}: {}", method, path, e)))?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                let text = response.text().await.unwrap_or_default();
                if refreshed {
                    warn!("ERP rejected refreshed token on {} {}", method, path);
                    return Err(GatewayError::Auth(truncate(text)));
                }
                warn!("ERP returned 401 on {} {}, refreshing token and retrying once", method, path);
                token = self.tokens.force_refresh(token.as_str()).await?;
                refreshed = true;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                rate_limited += 1;
                if rate_limited >= self.config.max_attempts {
                    warn!(
                        "ERP rate limit on {} {} persisted after {} attempts",
                        method, path, rate_limited
                    );
                    return Err(GatewayError::RateLimitExceeded {
                        attempts: rate_limited,
                    });
                }
                let wait = self.config.backoff_for(rate_limited);
                warn!(
                    "ERP returned 429 on {} {} (attempt {}/{}), backing off {:?}",
                    method, path, rate_limited, self.config.max_attempts, wait
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if status == StatusCode::NOT_FOUND && not_found_is_value {
                debug!("ERP {} {} not found", method, path);
                return Ok(Lookup::NotFound);
            }

            let text = response
                .text()
                .await
                .map_err(|e| GatewayError::Transport(format!("Failed to read response body: {}", e)))?;

            if !status.is_success() {
                return Err(GatewayError::ExternalApi {
                    status: status.as_u16(),
                    body: truncate(text),
                });
            }

            if text.trim().is_empty() {
                return Ok(Lookup::Found(Value::Null));
            }
            let value = serde_json::from_str(&text).map_err(|e| {
                GatewayError::UnexpectedShape(format!("{} {} returned invalid JSON: {}", method, path, e))
            })?;
            return Ok(Lookup::Found(value));
        }
    }
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}
