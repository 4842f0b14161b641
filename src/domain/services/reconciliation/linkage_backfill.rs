//! Linkage backfill: matches unlinked local orders against the ERP and stores the id.

use super::report::{BackfillJob, BackfillReport, ItemStatus};
use super::pause_between_items;
use crate::config::{AmbiguousMatchPolicy, BackfillConfig};
use crate::domain::errors::RepositoryError;
use crate::domain::repositories::ledger_repository::LedgerRepository;
use crate::domain::services::order_matcher::{MatchOutcome, OrderMatcher};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct LinkageBackfill {
    ledger: Arc<dyn LedgerRepository>,
    matcher: Arc<OrderMatcher>,
    config: BackfillConfig,
}

impl LinkageBackfill {
    pub fn new(ledger: Arc<dyn LedgerRepository>, matcher: Arc<OrderMatcher>, config: BackfillConfig) -> Self {
        Self {
            ledger,
            matcher,
            config,
        }
    }

    /// One pass over at most `page_size` unlinked orders, sequentially.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<BackfillReport, RepositoryError> {
        let orders = self
            .ledger
            .list_unlinked_orders(self.config.page_size, self.matcher.internal_prefixes())
            .await?;
        let mut report = BackfillReport::start(BackfillJob::Linkage);
        info!("Linkage backfill started with {} unlinked orders", orders.len());

        for (i, order) in orders.iter().enumerate() {
            if i > 0 && !pause_between_items(self.config.item_delay, cancel).await {
                report.cancelled = true;
                break;
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            if order.is_linked() {
                report.record(&order.id, ItemStatus::Skipped, "already linked");
                continue;
            }

            let outcome = match self.matcher.match_order(order).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Matching order {} failed: {}", order.id, e);
                    report.record(&order.id, ItemStatus::Failed, e.to_string());
                    if e.is_fatal_for_batch() {
                        error!("Linkage backfill aborted: {}", e);
                        report.aborted = Some(e.to_string());
                        break;
                    }
                    self.note_attempt(&order.id).await;
                    continue;
                }
            };

            let linked = match outcome {
                MatchOutcome::Matched(result) => {
                    match self.ledger.link_order(&order.id, &result.matched_external_id).await {
                        Ok(true) => {
                            report.record(
                                &order.id,
                                ItemStatus::Updated,
                                format!(
                                    "linked to {} via {:?}",
                                    result.matched_external_id, result.strategy_used
                                ),
                            );
                            true
                        }
                        Ok(false) => {
                            report.record(&order.id, ItemStatus::Skipped, "already linked");
                            true
                        }
                        Err(e) => {
                            error!("Failed to store linkage for order {}: {}", order.id, e);
                            report.record(&order.id, ItemStatus::Failed, e.to_string());
                            false
                        }
                    }
                }
                MatchOutcome::Skipped { reason } => {
                    report.record(&order.id, ItemStatus::Skipped, reason);
                    false
                }
                MatchOutcome::NotFound => {
                    report.record(&order.id, ItemStatus::Skipped, "no ERP match");
                    false
                }
                MatchOutcome::Ambiguous { candidates } => {
                    let reason = format!("ambiguous match: {}", candidates.join(", "));
                    match self.config.ambiguous_policy {
                        AmbiguousMatchPolicy::Skip => {
                            warn!("Order {} has {} candidates, skipped", order.id, candidates.len());
                            report.record(&order.id, ItemStatus::Skipped, reason);
                        }
                        AmbiguousMatchPolicy::Alert => {
                            error!(
                                alert = "ambiguous_match",
                                "Order {} (total {}) needs manual linkage: candidates {}",
                                order.id,
                                order.total,
                                candidates.join(", ")
                            );
                            report.record(&order.id, ItemStatus::Failed, reason);
                        }
                    }
                    false
                }
            };

            if !linked {
                self.note_attempt(&order.id).await;
            }
        }

        let report = report.finish();
        info!(
            "Linkage backfill finished: processed={} updated={} skipped={} failed={} cancelled={}",
            report.processed, report.updated, report.skipped, report.failed, report.cancelled
        );
        Ok(report)
    }

    /// Unresolved orders go behind the rest of the backlog for the next run.
    async fn note_attempt(&self, order_id: &str) {
        if let Err(e) = self.ledger.record_linkage_attempt(order_id).await {
            warn!("Failed to record linkage attempt for order {}: {}", order_id, e);
        }
    }
}
