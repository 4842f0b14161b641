//! Ledger Sync Service
//!
//! The entry points the rest of the application calls: settle an approved
//! proposal, inspect how far a settlement got, and run either backfill sweep.

use crate::application::actors::reconciliation_actor::{
    ReconciliationError, ReconciliationHandle, ReconciliationStatus,
};
use crate::domain::errors::{RepositoryError, SettlementError};
use crate::domain::repositories::ledger_repository::{LedgerRepository, SettlementProgress};
use crate::domain::services::reconciliation::{BackfillJob, BackfillReport};
use crate::domain::services::settlement::{SettlementOrchestrator, SettlementSummary};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    #[error("Settlement task for proposal {proposal_id} ended abnormally: {reason}")]
    TaskAborted { proposal_id: String, reason: String },
}

#[derive(Clone)]
pub struct LedgerSyncService {
    orchestrator: Arc<SettlementOrchestrator>,
    ledger: Arc<dyn LedgerRepository>,
    reconciliation: ReconciliationHandle,
}

impl LedgerSyncService {
    pub fn new(
        orchestrator: Arc<SettlementOrchestrator>,
        ledger: Arc<dyn LedgerRepository>,
        reconciliation: ReconciliationHandle,
    ) -> Self {
        Self {
            orchestrator,
            ledger,
            reconciliation,
        }
    }

    /// Settle an approved proposal.
    ///
    /// The workflow runs on its own task, so dropping the returned future
    /// (a closed HTTP connection, a timed-out caller) does not interrupt it
    /// between the ERP call and the local writes.
    pub async fn settle_approved_order(&self, proposal_id: &str) -> Result<SettlementSummary, ServiceError> {
        info!("Settlement requested for proposal {}", proposal_id);
        let orchestrator = self.orchestrator.clone();
        let id = proposal_id.to_string();

        let task = tokio::spawn(async move { orchestrator.settle(&id).await });
        match task.await {
            Ok(result) => Ok(result?),
            Err(e) => {
                error!("Settlement task for proposal {} failed: {}", proposal_id, e);
                Err(ServiceError::TaskAborted {
                    proposal_id: proposal_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    pub async fn settlement_progress(&self, proposal_id: &str) -> Result<Option<SettlementProgress>, ServiceError> {
        Ok(self.ledger.settlement_progress(proposal_id).await?)
    }

    pub async fn backfill_linkages(&self) -> Result<BackfillReport, ServiceError> {
        Ok(self.reconciliation.run(BackfillJob::Linkage).await?)
    }

    pub async fn backfill_documents(&self) -> Result<BackfillReport, ServiceError> {
        Ok(self.reconciliation.run(BackfillJob::Documents).await?)
    }

    pub async fn reconciliation_status(&self) -> Result<ReconciliationStatus, ServiceError> {
        Ok(self.reconciliation.status().await?)
    }

    pub fn reconciliation(&self) -> &ReconciliationHandle {
        &self.reconciliation
    }
}
