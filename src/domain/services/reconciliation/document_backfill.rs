//! Document backfill: resolves fiscal documents once per external order id and
//! writes the link onto every order and installment sharing that id.

use super::pause_between_items;
use super::report::{BackfillJob, BackfillReport, ItemStatus};
use crate::config::BackfillConfig;
use crate::domain::errors::RepositoryError;
use crate::domain::repositories::ledger_repository::LedgerRepository;
use crate::domain::services::document_resolver::{DocumentResolver, ResolveOutcome};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct DocumentBackfill {
    ledger: Arc<dyn LedgerRepository>,
    resolver: Arc<DocumentResolver>,
    config: BackfillConfig,
}

impl DocumentBackfill {
    pub fn new(ledger: Arc<dyn LedgerRepository>, resolver: Arc<DocumentResolver>, config: BackfillConfig) -> Self {
        Self {
            ledger,
            resolver,
            config,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<BackfillReport, RepositoryError> {
        let external_ids = self
            .ledger
            .list_pending_document_links(self.config.page_size)
            .await?;
        let mut report = BackfillReport::start(BackfillJob::Documents);
        info!(
            "Document backfill started with {} external orders pending",
            external_ids.len()
        );

        for (i, external_id) in external_ids.iter().enumerate() {
            if i > 0 && !pause_between_items(self.config.item_delay, cancel).await {
                report.cancelled = true;
                break;
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let outcome = match self.resolver.resolve_fiscal_document(external_id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Resolving documents of ERP order {} failed: {}", external_id, e);
                    report.record(external_id, ItemStatus::Failed, e.to_string());
                    if e.is_fatal_for_batch() {
                        error!("Document backfill aborted: {}", e);
                        report.aborted = Some(e.to_string());
                        break;
                    }
                    self.note_attempt(external_id).await;
                    continue;
                }
            };

            let applied = match outcome {
                ResolveOutcome::Resolved(link) => {
                    match self.ledger.apply_fiscal_document(external_id, &link).await {
                        Ok(rows) => {
                            report.record(
                                external_id,
                                ItemStatus::Updated,
                                format!("document {} applied to {} records", link.document_number, rows),
                            );
                            true
                        }
                        Err(e) => {
                            error!(
                                "Failed to store document {} for ERP order {}: {}",
                                link.document_number, external_id, e
                            );
                            report.record(external_id, ItemStatus::Failed, e.to_string());
                            false
                        }
                    }
                }
                ResolveOutcome::NotReady {
                    document_id,
                    status,
                    reason,
                } => {
                    debug!(
                        "Document {} of ERP order {} not ready (status {:?})",
                        document_id, external_id, status
                    );
                    let status = status.map_or_else(|| "unknown".to_string(), |s| s.to_string());
                    report.record(
                        external_id,
                        ItemStatus::Skipped,
                        format!("{} (document {}, status {})", reason, document_id, status),
                    );
                    false
                }
                ResolveOutcome::NotFound => {
                    report.record(external_id, ItemStatus::Skipped, "no fiscal document yet");
                    false
                }
            };

            if !applied {
                self.note_attempt(external_id).await;
            }
        }

        let report = report.finish();
        info!(
            "Document backfill finished: processed={} updated={} skipped={} failed={} cancelled={}",
            report.processed, report.updated, report.skipped, report.failed, report.cancelled
        );
        Ok(report)
    }

    async fn note_attempt(&self, external_id: &str) {
        if let Err(e) = self.ledger.record_document_attempt(external_id).await {
            warn!("Failed to record document attempt for ERP order {}: {}", external_id, e);
        }
    }
}
