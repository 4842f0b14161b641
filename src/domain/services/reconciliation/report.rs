//! Per-run result of a backfill sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillJob {
    Linkage,
    Documents,
}

impl BackfillJob {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillJob::Linkage => "linkage",
            BackfillJob::Documents => "documents",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "linkage" => Some(BackfillJob::Linkage),
            "documents" => Some(BackfillJob::Documents),
            _ => None,
        }
    }
}

impl fmt::Display for BackfillJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Updated,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillItem {
    /// Local order id (linkage) or external order id (documents).
    pub key: String,
    pub status: ItemStatus,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub job: BackfillJob,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processed: u32,
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,
    /// Stopped by the cancellation signal before the backlog was exhausted.
    pub cancelled: bool,
    /// Set when an error affecting every call (credentials, auth, rate limit) stopped the run.
    pub aborted: Option<String>,
    pub items: Vec<BackfillItem>,
}

impl BackfillReport {
    pub fn start(job: BackfillJob) -> Self {
        Self {
            job,
            started_at: Utc::now(),
            finished_at: None,
            processed: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            cancelled: false,
            aborted: None,
            items: Vec::new(),
        }
    }

    pub fn record(&mut self, key: &str, status: ItemStatus, reason: impl Into<String>) {
        self.processed += 1;
        match status {
            ItemStatus::Updated => self.updated += 1,
            ItemStatus::Skipped => self.skipped += 1,
            ItemStatus::Failed => self.failed += 1,
        }
        self.items.push(BackfillItem {
            key: key.to_string(),
            status,
            reason: reason.into(),
        });
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.aborted.is_none()
    }
}
