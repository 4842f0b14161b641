//! Backfill Audit Repository
//!
//! One row per backfill run: the counters as columns for quick queries and
//! the full report, item outcomes included, as JSON.

use super::DbPool;
use crate::domain::errors::RepositoryError;
use crate::domain::services::reconciliation::{BackfillJob, BackfillReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, error};

#[async_trait]
pub trait BackfillAuditRepository: Send + Sync {
    async fn save_report(&self, report: &BackfillReport) -> Result<(), RepositoryError>;

    async fn latest_report(&self, job: BackfillJob) -> Result<Option<BackfillReport>, RepositoryError>;

    async fn report_history(&self, job: BackfillJob, days: u32) -> Result<Vec<BackfillReport>, RepositoryError>;
}

pub struct SqliteBackfillAudit {
    pool: DbPool,
}

impl SqliteBackfillAudit {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn storage(context: &str, e: impl std::fmt::Display) -> RepositoryError {
    error!("{}: {}", context, e);
    RepositoryError::Storage(format!("{}: {}", context, e))
}

fn decode(json: &str) -> Result<BackfillReport, RepositoryError> {
    serde_json::from_str(json).map_err(|e| storage("Failed to decode backfill report", e))
}

#[async_trait]
impl BackfillAuditRepository for SqliteBackfillAudit {
    async fn save_report(&self, report: &BackfillReport) -> Result<(), RepositoryError> {
        let report_json =
            serde_json::to_string(report).map_err(|e| storage("Failed to encode backfill report", e))?;

        sqlx::query(
            r#"
            INSERT INTO backfill_audit (
                job, started_at, finished_at, processed, updated, skipped, failed,
                cancelled, aborted, report_json
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(report.job.as_str())
        .bind(report.started_at)
        .bind(report.finished_at)
        .bind(report.processed as i64)
        .bind(report.updated as i64)
        .bind(report.skipped as i64)
        .bind(report.failed as i64)
        .bind(report.cancelled)
        .bind(&report.aborted)
        .bind(&report_json)
        .execute(&self.pool)
        .await
        .map_err(|e| storage("Failed to save backfill audit", e))?;

        debug!("Saved {} backfill audit ({} processed)", report.job, report.processed);
        Ok(())
    }

    async fn latest_report(&self, job: BackfillJob) -> Result<Option<BackfillReport>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT report_json FROM backfill_audit
            WHERE job = ?1
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(job.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("Failed to get latest backfill audit", e))?;

        row.map(|row| decode(&row.get::<String, _>("report_json")))
            .transpose()
    }

    async fn report_history(&self, job: BackfillJob, days: u32) -> Result<Vec<BackfillReport>, RepositoryError> {
        let cutoff: DateTime<Utc> = Utc::now() - chrono::Duration::days(days as i64);

        let rows = sqlx::query(
            r#"
            SELECT report_json FROM backfill_audit
            WHERE job = ?1 AND started_at >= ?2
            ORDER BY started_at DESC, id DESC
            "#,
        )
        .bind(job.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to get backfill audit history", e))?;

        rows.iter()
            .map(|row| decode(&row.get::<String, _>("report_json")))
            .collect()
    }
}
