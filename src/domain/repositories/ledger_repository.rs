//! Local ledger access needed by settlement and the backfill sweeps.

use crate::domain::entities::installment::{CommissionInstallment, RecognizedSale};
use crate::domain::entities::local_order::{FiscalDocumentLink, LocalOrder};
use crate::domain::entities::proposal::Proposal;
use crate::domain::errors::RepositoryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// How far a settlement got, derived from local rows only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SettlementProgress {
    /// Proposal exists and carries no external linkage.
    NotStarted,
    /// Proposal marked settled with its external order id.
    Linked,
    /// Recognized-sale record written.
    LedgerRecorded,
    /// Commission installments written.
    InstallmentsGenerated,
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn get_proposal(&self, proposal_id: &str) -> RepositoryResult<Option<Proposal>>;

    /// Moves an approved proposal to settled and stores the linkage.
    /// Fails with `Conflict` if the proposal is no longer approved.
    async fn mark_proposal_settled(
        &self,
        proposal_id: &str,
        external_order_id: &str,
        external_order_number: &str,
    ) -> RepositoryResult<()>;

    async fn insert_recognized_sale(&self, sale: &RecognizedSale) -> RepositoryResult<()>;

    /// All rows in one transaction. Fails with `Conflict` when the parent already has a schedule.
    async fn insert_installments(&self, installments: &[CommissionInstallment]) -> RepositoryResult<()>;

    async fn installment_count(&self, parent_ref: &str) -> RepositoryResult<u32>;

    /// Orders with a store number and no external id, excluding numbers that
    /// start with one of `excluded_prefixes`. Never-attempted orders come first,
    /// then the least recently attempted; ties by order date.
    async fn list_unlinked_orders(
        &self,
        limit: u32,
        excluded_prefixes: &[String],
    ) -> RepositoryResult<Vec<LocalOrder>>;

    /// Moves the order behind every other unlinked order in the next selection.
    async fn record_linkage_attempt(&self, order_id: &str) -> RepositoryResult<()>;

    /// Stores the external id unless one is already present. Returns whether a row changed.
    async fn link_order(&self, order_id: &str, external_order_id: &str) -> RepositoryResult<bool>;

    /// Distinct external ids that still have orders or installments without a
    /// document link, least recently attempted first.
    async fn list_pending_document_links(&self, limit: u32) -> RepositoryResult<Vec<String>>;

    /// Moves the external id behind every other pending id in the next selection.
    async fn record_document_attempt(&self, external_order_id: &str) -> RepositoryResult<()>;

    /// Writes the link onto every order and installment of the external id still missing one.
    /// Returns the number of rows updated.
    async fn apply_fiscal_document(
        &self,
        external_order_id: &str,
        link: &FiscalDocumentLink,
    ) -> RepositoryResult<u64>;

    async fn settlement_progress(&self, proposal_id: &str) -> RepositoryResult<Option<SettlementProgress>>;
}
