//! Operator HTTP API over `LedgerSyncService`.
//!
//! | Route                              | Action                              |
//! |------------------------------------|-------------------------------------|
//! | `POST /settlements/:proposal_id`   | settle an approved proposal         |
//! | `GET /settlements/:proposal_id`    | settlement progress                 |
//! | `POST /reconciliation/linkages`    | run the linkage backfill            |
//! | `POST /reconciliation/documents`   | run the document backfill           |
//! | `GET /reconciliation/status`       | run statistics and last reports     |
//! | `GET /health`                      | liveness                            |

use crate::application::actors::reconciliation_actor::{ReconciliationError, ReconciliationStatus};
use crate::application::services::ledger_sync_service::{LedgerSyncService, ServiceError};
use crate::domain::errors::{RepositoryError, SettlementError, SettlementStage};
use crate::domain::repositories::ledger_repository::SettlementProgress;
use crate::domain::services::reconciliation::BackfillReport;
use crate::domain::services::settlement::SettlementSummary;
use crate::rate_limit::{rate_limit_middleware, GlobalRateLimiter};
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_order_number: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl ErrorResponse {
    fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            stage: None,
            external_order_id: None,
            external_order_number: None,
            violations: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub proposal_id: String,
    pub progress: SettlementProgress,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: ServiceError) -> ApiError {
    let (status, body) = match &err {
        ServiceError::Settlement(SettlementError::InvalidState { violations, .. }) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorResponse {
                violations: violations.clone(),
                stage: Some(SettlementStage::Validating.to_string()),
                ..ErrorResponse::message(err.to_string())
            },
        ),
        ServiceError::Settlement(SettlementError::Failed { stage, .. }) => {
            let status = if *stage == SettlementStage::ExternalOrderCreating {
                StatusCode::BAD_GATEWAY
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                status,
                ErrorResponse {
                    stage: Some(stage.to_string()),
                    ..ErrorResponse::message(err.to_string())
                },
            )
        }
        ServiceError::Settlement(SettlementError::PartialSettlementFailure {
            stage,
            external_order_id,
            external_order_number,
            ..
        }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse {
                stage: Some(stage.to_string()),
                external_order_id: Some(external_order_id.clone()),
                external_order_number: Some(external_order_number.clone()),
                ..ErrorResponse::message(err.to_string())
            },
        ),
        ServiceError::Repository(RepositoryError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, ErrorResponse::message(err.to_string()))
        }
        ServiceError::Repository(RepositoryError::Conflict(_)) => {
            (StatusCode::CONFLICT, ErrorResponse::message(err.to_string()))
        }
        ServiceError::Reconciliation(ReconciliationError::ActorUnavailable) => {
            (StatusCode::SERVICE_UNAVAILABLE, ErrorResponse::message(err.to_string()))
        }
        ServiceError::Reconciliation(ReconciliationError::Timeout) => {
            (StatusCode::GATEWAY_TIMEOUT, ErrorResponse::message(err.to_string()))
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::message(err.to_string())),
    };
    if status.is_server_error() {
        warn!("API request failed: {}", err);
    }
    (status, Json(body))
}

pub async fn settle_proposal(
    State(service): State<LedgerSyncService>,
    Path(proposal_id): Path<String>,
) -> Result<Json<SettlementSummary>, ApiError> {
    service
        .settle_approved_order(&proposal_id)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn get_settlement_progress(
    State(service): State<LedgerSyncService>,
    Path(proposal_id): Path<String>,
) -> Result<Json<ProgressResponse>, ApiError> {
    match service.settlement_progress(&proposal_id).await.map_err(api_error)? {
        Some(progress) => Ok(Json(ProgressResponse {
            proposal_id,
            progress,
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::message(format!("Unknown proposal: {}", proposal_id))),
        )),
    }
}

pub async fn run_linkage_backfill(
    State(service): State<LedgerSyncService>,
) -> Result<Json<BackfillReport>, ApiError> {
    service.backfill_linkages().await.map(Json).map_err(api_error)
}

pub async fn run_document_backfill(
    State(service): State<LedgerSyncService>,
) -> Result<Json<BackfillReport>, ApiError> {
    service.backfill_documents().await.map(Json).map_err(api_error)
}

pub async fn get_reconciliation_status(
    State(service): State<LedgerSyncService>,
) -> Result<Json<ReconciliationStatus>, ApiError> {
    service.reconciliation_status().await.map(Json).map_err(api_error)
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Build the operator router. Settlements are processed one at a time.
pub fn router(service: LedgerSyncService, limiter: GlobalRateLimiter) -> Router {
    Router::new()
        .route(
            "/settlements/:proposal_id",
            post(settle_proposal)
                .layer(ConcurrencyLimitLayer::new(1))
                .get(get_settlement_progress),
        )
        .route("/reconciliation/linkages", post(run_linkage_backfill))
        .route("/reconciliation/documents", post(run_document_backfill))
        .route("/reconciliation/status", get(get_reconciliation_status))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(move |request: Request, next: Next| {
            rate_limit_middleware(limiter.clone(), request, next)
        }))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
