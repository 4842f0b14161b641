//! Reconciliation Actor
//!
//! Owns both backfill sweeps and runs them one at a time, whether they were
//! requested by the scheduler or by an operator. Keeps run statistics and the
//! last report per job, and writes every report to the audit trail.

use crate::domain::errors::RepositoryError;
use crate::domain::services::reconciliation::{BackfillJob, BackfillReport, DocumentBackfill, LinkageBackfill};
use crate::persistence::backfill_audit::BackfillAuditRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Channel capacity for reconciliation actor messages
const RECONCILIATION_CHANNEL_CAPACITY: usize = 16;

/// Status requests never wait behind a long sweep for more than this.
const STATUS_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconciliationError {
    #[error("Backfill could not read the ledger: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Reconciliation actor is not running")]
    ActorUnavailable,

    #[error("Reconciliation actor did not answer in time")]
    Timeout,
}

#[derive(Debug)]
pub enum ReconciliationMessage {
    RunBackfill {
        job: BackfillJob,
        reply: Option<mpsc::Sender<Result<BackfillReport, ReconciliationError>>>,
    },

    GetStatus {
        reply: mpsc::Sender<ReconciliationStatus>,
    },

    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationStats {
    pub total_runs: u64,
    pub clean_runs: u64,
    /// Runs that finished with failed items or were aborted.
    pub runs_with_failures: u64,
    /// Runs that could not start because the ledger was unreadable.
    pub errored_runs: u64,
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationStatus {
    pub stats: ReconciliationStats,
    pub last_reports: Vec<BackfillReport>,
}

pub struct ReconciliationActor {
    linkage: Arc<LinkageBackfill>,
    documents: Arc<DocumentBackfill>,
    audit: Option<Arc<dyn BackfillAuditRepository>>,
    cancel: CancellationToken,
    stats: ReconciliationStats,
    last_reports: HashMap<BackfillJob, BackfillReport>,
}

impl ReconciliationActor {
    pub fn new(
        linkage: Arc<LinkageBackfill>,
        documents: Arc<DocumentBackfill>,
        audit: Option<Arc<dyn BackfillAuditRepository>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            linkage,
            documents,
            audit,
            cancel,
            stats: ReconciliationStats::default(),
            last_reports: HashMap::new(),
        }
    }

    /// Spawn the actor. Cancelling `cancel` stops a running sweep at its next item boundary.
    pub fn spawn(
        linkage: Arc<LinkageBackfill>,
        documents: Arc<DocumentBackfill>,
        audit: Option<Arc<dyn BackfillAuditRepository>>,
        cancel: CancellationToken,
    ) -> ReconciliationHandle {
        let (tx, rx) = mpsc::channel(RECONCILIATION_CHANNEL_CAPACITY);
        let actor = Self::new(linkage, documents, audit, cancel.clone());

        tokio::spawn(async move {
            actor.run(rx).await;
        });

        info!("ReconciliationActor spawned");
        ReconciliationHandle { tx, cancel }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ReconciliationMessage>) {
        info!("ReconciliationActor started");

        while let Some(msg) = rx.recv().await {
            match msg {
                ReconciliationMessage::RunBackfill { job, reply } => {
                    debug!("ReconciliationActor received RunBackfill for {}", job);
                    let result = self.run_backfill(job).await;
                    if let Some(reply) = reply {
                        if let Err(e) = reply.send(result).await {
                            warn!("Failed to send RunBackfill reply: {:?}", e);
                        }
                    }
                }

                ReconciliationMessage::GetStatus { reply } => {
                    debug!("ReconciliationActor received GetStatus");
                    if let Err(e) = reply.send(self.status()).await {
                        warn!("Failed to send GetStatus reply: {:?}", e);
                    }
                }

                ReconciliationMessage::Shutdown => {
                    info!("ReconciliationActor received shutdown signal");
                    break;
                }
            }
        }

        info!("ReconciliationActor stopped");
    }

    async fn run_backfill(&mut self, job: BackfillJob) -> Result<BackfillReport, ReconciliationError> {
        let result = match job {
            BackfillJob::Linkage => self.linkage.run(&self.cancel).await,
            BackfillJob::Documents => self.documents.run(&self.cancel).await,
        };

        self.stats.total_runs += 1;
        self.stats.last_run = Some(Utc::now());

        match result {
            Ok(report) => {
                if report.is_clean() {
                    self.stats.clean_runs += 1;
                } else {
                    self.stats.runs_with_failures += 1;
                }
                info!(
                    "{} backfill finished: {} processed, {} updated, {} skipped, {} failed{}",
                    job,
                    report.processed,
                    report.updated,
                    report.skipped,
                    report.failed,
                    if report.cancelled { " (cancelled)" } else { "" }
                );

                if let Some(audit) = &self.audit {
                    if let Err(e) = audit.save_report(&report).await {
                        warn!("Failed to persist {} backfill report: {}", job, e);
                    }
                }
                self.last_reports.insert(job, report.clone());
                Ok(report)
            }
            Err(e) => {
                self.stats.errored_runs += 1;
                error!("{} backfill could not run: {}", job, e);
                Err(e.into())
            }
        }
    }

    fn status(&self) -> ReconciliationStatus {
        let mut last_reports: Vec<BackfillReport> = self.last_reports.values().cloned().collect();
        last_reports.sort_by_key(|r| r.job.as_str());
        ReconciliationStatus {
            stats: self.stats.clone(),
            last_reports,
        }
    }
}

/// Cloneable front for the actor's mailbox.
#[derive(Clone)]
pub struct ReconciliationHandle {
    tx: mpsc::Sender<ReconciliationMessage>,
    cancel: CancellationToken,
}

impl ReconciliationHandle {
    /// Queue a sweep and wait for its report.
    pub async fn run(&self, job: BackfillJob) -> Result<BackfillReport, ReconciliationError> {
        let (reply, mut rx) = mpsc::channel(1);
        self.tx
            .send(ReconciliationMessage::RunBackfill {
                job,
                reply: Some(reply),
            })
            .await
            .map_err(|_| ReconciliationError::ActorUnavailable)?;
        rx.recv().await.ok_or(ReconciliationError::ActorUnavailable)?
    }

    /// Queue a sweep without waiting for it.
    pub async fn trigger(&self, job: BackfillJob) -> Result<(), ReconciliationError> {
        self.tx
            .send(ReconciliationMessage::RunBackfill { job, reply: None })
            .await
            .map_err(|_| ReconciliationError::ActorUnavailable)
    }

    pub async fn status(&self) -> Result<ReconciliationStatus, ReconciliationError> {
        let (reply, mut rx) = mpsc::channel(1);
        self.tx
            .send(ReconciliationMessage::GetStatus { reply })
            .await
            .map_err(|_| ReconciliationError::ActorUnavailable)?;
        match timeout(STATUS_REPLY_TIMEOUT, rx.recv()).await {
            Ok(Some(status)) => Ok(status),
            Ok(None) => Err(ReconciliationError::ActorUnavailable),
            Err(_) => Err(ReconciliationError::Timeout),
        }
    }

    /// Stop the running sweep at its next item boundary and close the actor.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if self.tx.send(ReconciliationMessage::Shutdown).await.is_err() {
            debug!("ReconciliationActor already stopped");
        }
    }
}
