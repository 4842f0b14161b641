//! Scripted ERP HTTP server for integration tests.
//!
//! Every request is answered from a per-route queue of scripted responses,
//! then from the route's default, then with 404. `POST /oauth/token` issues
//! `access-N` / `refresh-N` pairs unless scripted otherwise.

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use ledgersync::config::{GatewayConfig, SyncConfig};
use ledgersync::domain::entities::credential::{ClientCredentials, TokenPair};
use ledgersync::domain::repositories::credential_store::CredentialStore;
use ledgersync::infrastructure::credential_manager::{CredentialManager, OAuthTokenEndpoint};
use ledgersync::persistence::credential_repository::SqliteCredentialStore;
use ledgersync::persistence::{init_database, DatabaseConfig, DbPool};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zeroize::Zeroizing;

pub const TOKEN_PATH: &str = "/oauth/token";
pub const SCOPE: &str = "test";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone)]
struct Scripted {
    status: u16,
    body: String,
}

#[derive(Default)]
struct MockState {
    queued: HashMap<String, VecDeque<Scripted>>,
    defaults: HashMap<String, Scripted>,
    requests: Vec<RecordedRequest>,
    tokens_issued: u32,
}

#[derive(Clone)]
pub struct MockErp {
    pub base_url: String,
    state: Arc<Mutex<MockState>>,
}

fn route_key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_uppercase(), path)
}

async fn handle(
    State(state): State<Arc<Mutex<MockState>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let key = route_key(method.as_str(), &path);

    let mut state = state.lock().unwrap();
    state.requests.push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        query: uri.query().map(str::to_string),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: String::from_utf8_lossy(&body).to_string(),
    });

    let queued = state.queued.get_mut(&key).and_then(VecDeque::pop_front);
    let scripted = queued.or_else(|| state.defaults.get(&key).cloned());

    let (status, body) = match scripted {
        Some(s) => (s.status, s.body),
        None if method == Method::POST && path == TOKEN_PATH => {
            state.tokens_issued += 1;
            let n = state.tokens_issued;
            (
                200,
                json!({
                    "access_token": format!("access-{}", n),
                    "refresh_token": format!("refresh-{}", n),
                    "expires_in": 21600,
                    "token_type": "Bearer",
                })
                .to_string(),
            )
        }
        None => (404, json!({"error": {"type": "RESOURCE_NOT_FOUND"}}).to_string()),
    };

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [("content-type", "application/json")], body).into_response()
}

impl MockErp {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(MockState::default()));
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}{}", self.base_url, TOKEN_PATH)
    }

    /// Queue one response for `METHOD path`.
    pub fn enqueue(&self, method: &str, path: &str, status: u16, body: Value) {
        self.enqueue_raw(method, path, status, &body.to_string());
    }

    pub fn enqueue_raw(&self, method: &str, path: &str, status: u16, body: &str) {
        self.state
            .lock()
            .unwrap()
            .queued
            .entry(route_key(method, path))
            .or_default()
            .push_back(Scripted {
                status,
                body: body.to_string(),
            });
    }

    /// Response used once the queue for `METHOD path` is empty.
    pub fn respond(&self, method: &str, path: &str, status: u16, body: Value) {
        self.state.lock().unwrap().defaults.insert(
            route_key(method, path),
            Scripted {
                status,
                body: body.to_string(),
            },
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method.eq_ignore_ascii_case(method) && r.path == path)
            .collect()
    }

    pub fn token_requests(&self) -> usize {
        self.requests_to("POST", TOKEN_PATH).len()
    }
}

/// Gateway settings pointed at the mock, with millisecond backoffs.
pub fn fast_gateway_config(mock: &MockErp, max_attempts: u32) -> GatewayConfig {
    GatewayConfig {
        base_url: mock.base_url.clone(),
        min_interval: Duration::from_millis(1),
        max_attempts,
        backoff_step: Duration::from_millis(5),
        backoff_ceiling: Duration::from_millis(20),
        request_timeout: Duration::from_secs(5),
    }
}

pub fn fast_sync_config(mock: &MockErp) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.gateway = fast_gateway_config(mock, 3);
    config.credential.token_url = mock.token_url();
    config.credential.scope = SCOPE.to_string();
    config.backfill.item_delay = Duration::from_millis(1);
    config
}

pub async fn memory_pool() -> DbPool {
    init_database(&DatabaseConfig::in_memory()).await.unwrap()
}

/// Credential manager backed by SQLite, holding a still-valid `stale-access` token.
pub async fn credential_manager(mock: &MockErp, pool: &DbPool) -> Arc<CredentialManager> {
    let store = Arc::new(SqliteCredentialStore::new(pool.clone()));
    store
        .save(
            SCOPE,
            &TokenPair {
                access_token: Zeroizing::new("stale-access".to_string()),
                refresh_token: Zeroizing::new("refresh-0".to_string()),
                expires_at: Some(Utc::now() + ChronoDuration::hours(6)),
            },
        )
        .await
        .unwrap();

    let endpoint = Arc::new(OAuthTokenEndpoint::new(&mock.token_url(), Duration::from_secs(5)).unwrap());
    Arc::new(CredentialManager::new(
        SCOPE,
        ClientCredentials {
            client_id: "client-1".to_string(),
            client_secret: Zeroizing::new("secret-1".to_string()),
        },
        endpoint,
        store,
        Duration::from_secs(300),
    ))
}
