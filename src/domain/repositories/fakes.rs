//! In-memory implementations of the repository traits for service tests.

use crate::domain::entities::credential::{ClientCredentials, RefreshedTokens, TokenPair};
use crate::domain::entities::installment::{CommissionInstallment, RecognizedSale};
use crate::domain::entities::local_order::{FiscalDocumentLink, LocalOrder};
use crate::domain::entities::proposal::{Proposal, ProposalStatus};
use crate::domain::errors::{CredentialError, GatewayError, RepositoryError};
use crate::domain::repositories::credential_store::CredentialStore;
use crate::domain::repositories::erp_api::{
    CreateOrderRequest, ErpApi, ErpResult, ExternalOrderSummary, Lookup,
};
use crate::domain::repositories::ledger_repository::{
    LedgerRepository, RepositoryResult, SettlementProgress,
};
use crate::domain::value_objects::order_number::has_internal_prefix;
use crate::infrastructure::credential_manager::TokenEndpoint;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use zeroize::Zeroizing;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCredentialStore {
    pairs: Mutex<HashMap<String, TokenPair>>,
    fail_saves: bool,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(scope: &str, pair: TokenPair) -> Self {
        let store = Self::default();
        store.pairs.lock().unwrap().insert(scope.to_string(), pair);
        store
    }

    pub fn failing_saves(mut self) -> Self {
        self.fail_saves = true;
        self
    }

    pub fn get(&self, scope: &str) -> Option<TokenPair> {
        self.pairs.lock().unwrap().get(scope).cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, scope: &str) -> Result<Option<TokenPair>, CredentialError> {
        Ok(self.get(scope))
    }

    async fn save(&self, scope: &str, tokens: &TokenPair) -> Result<(), CredentialError> {
        if self.fail_saves {
            return Err(CredentialError::Persistence("store offline".to_string()));
        }
        self.pairs
            .lock()
            .unwrap()
            .insert(scope.to_string(), tokens.clone());
        Ok(())
    }
}

/// Issues `access-N`/`refresh-N` on the N-th refresh.
pub struct FakeTokenEndpoint {
    calls: AtomicUsize,
    delay: Duration,
    reject: Option<(u16, String)>,
    seen: Mutex<Vec<String>>,
}

impl FakeTokenEndpoint {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            reject: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn rejecting(mut self, status: u16, body: &str) -> Self {
        self.reject = Some((status, body.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenEndpoint for FakeTokenEndpoint {
    async fn refresh(
        &self,
        _client: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, CredentialError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().unwrap().push(refresh_token.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some((status, body)) = &self.reject {
            return Err(CredentialError::Rejected {
                status: *status,
                body: body.clone(),
            });
        }
        Ok(RefreshedTokens {
            access_token: Zeroizing::new(format!("access-{}", n)),
            refresh_token: Zeroizing::new(format!("refresh-{}", n)),
            expires_in_secs: 21600,
        })
    }
}

// ---------------------------------------------------------------------------
// ERP
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ErpState {
    by_store_number: HashMap<String, Vec<ExternalOrderSummary>>,
    dated: Vec<ExternalOrderSummary>,
    orders: HashMap<String, Value>,
    documents_by_order: HashMap<String, Vec<Value>>,
    documents: HashMap<String, Value>,
    failing_orders: HashMap<String, GatewayError>,
    search_error: Option<GatewayError>,
    create_response: Option<ErpResult<Value>>,
    created: Vec<CreateOrderRequest>,
}

/// Scripted ERP. Every trait call increments `calls()`.
#[derive(Default)]
pub struct FakeErp {
    state: Mutex<ErpState>,
    calls: AtomicUsize,
}

impl FakeErp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(id: &str, store_number: Option<&str>, date: NaiveDate, cents: i64) -> ExternalOrderSummary {
        ExternalOrderSummary {
            id: id.to_string(),
            number: Some(format!("N{}", id)),
            store_number: store_number.map(str::to_string),
            date: Some(date),
            total: Some(crate::domain::value_objects::money::Money::from_cents(cents)),
        }
    }

    /// Answer for a store-number query, returned verbatim (the real filter is fuzzy).
    pub fn with_store_search(self, query: &str, results: Vec<ExternalOrderSummary>) -> Self {
        self.state
            .lock()
            .unwrap()
            .by_store_number
            .insert(query.to_string(), results);
        self
    }

    pub fn with_dated_order(self, summary: ExternalOrderSummary) -> Self {
        self.state.lock().unwrap().dated.push(summary);
        self
    }

    pub fn with_order(self, id: &str, detail: Value) -> Self {
        self.state.lock().unwrap().orders.insert(id.to_string(), detail);
        self
    }

    pub fn with_order_error(self, id: &str, error: GatewayError) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_orders
            .insert(id.to_string(), error);
        self
    }

    /// Both search endpoints fail with `error`.
    pub fn with_search_error(self, error: GatewayError) -> Self {
        self.state.lock().unwrap().search_error = Some(error);
        self
    }

    pub fn with_documents_for_order(self, order_id: &str, documents: Vec<Value>) -> Self {
        self.state
            .lock()
            .unwrap()
            .documents_by_order
            .insert(order_id.to_string(), documents);
        self
    }

    pub fn with_document(self, id: &str, detail: Value) -> Self {
        self.state
            .lock()
            .unwrap()
            .documents
            .insert(id.to_string(), detail);
        self
    }

    pub fn with_create_response(self, response: ErpResult<Value>) -> Self {
        self.state.lock().unwrap().create_response = Some(response);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn created_requests(&self) -> Vec<CreateOrderRequest> {
        self.state.lock().unwrap().created.clone()
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ErpApi for FakeErp {
    async fn search_orders_by_store_number(
        &self,
        store_number: &str,
    ) -> ErpResult<Vec<ExternalOrderSummary>> {
        self.hit();
        let state = self.state.lock().unwrap();
        if let Some(err) = &state.search_error {
            return Err(err.clone());
        }
        Ok(state
            .by_store_number
            .get(store_number)
            .cloned()
            .unwrap_or_default())
    }

    async fn search_orders_by_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        page: u32,
        page_size: u32,
    ) -> ErpResult<Vec<ExternalOrderSummary>> {
        self.hit();
        let state = self.state.lock().unwrap();
        if let Some(err) = &state.search_error {
            return Err(err.clone());
        }
        let skip = (page.saturating_sub(1) * page_size) as usize;
        Ok(state
            .dated
            .iter()
            .filter(|o| o.date.map_or(false, |d| d >= from && d <= to))
            .skip(skip)
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn get_order(&self, order_id: &str) -> ErpResult<Lookup<Value>> {
        self.hit();
        let state = self.state.lock().unwrap();
        if let Some(err) = state.failing_orders.get(order_id) {
            return Err(err.clone());
        }
        Ok(match state.orders.get(order_id) {
            Some(detail) => Lookup::Found(detail.clone()),
            None => Lookup::NotFound,
        })
    }

    async fn list_documents_for_order(&self, order_id: &str) -> ErpResult<Vec<Value>> {
        self.hit();
        Ok(self
            .state
            .lock()
            .unwrap()
            .documents_by_order
            .get(order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_fiscal_document(&self, document_id: &str) -> ErpResult<Lookup<Value>> {
        self.hit();
        Ok(match self.state.lock().unwrap().documents.get(document_id) {
            Some(detail) => Lookup::Found(detail.clone()),
            None => Lookup::NotFound,
        })
    }

    async fn create_order(&self, request: &CreateOrderRequest) -> ErpResult<Value> {
        self.hit();
        let mut state = self.state.lock().unwrap();
        state.created.push(request.clone());
        state
            .create_response
            .clone()
            .unwrap_or_else(|| Ok(serde_json::json!({"data": {"id": 9001, "numero": 4512}})))
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Which write the ledger should refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailingWrite {
    MarkSettled,
    RecognizedSale,
    Installments,
    ApplyDocument,
}

#[derive(Default)]
struct LedgerState {
    proposals: HashMap<String, Proposal>,
    orders: Vec<LocalOrder>,
    sales: Vec<RecognizedSale>,
    installments: Vec<CommissionInstallment>,
    failing: Option<FailingWrite>,
    attempts: HashMap<(&'static str, String), u64>,
    attempt_seq: u64,
}

impl LedgerState {
    fn attempt_rank(&self, job: &'static str, key: &str) -> u64 {
        self.attempts.get(&(job, key.to_string())).copied().unwrap_or(0)
    }

    fn record_attempt(&mut self, job: &'static str, key: &str) {
        self.attempt_seq += 1;
        let seq = self.attempt_seq;
        self.attempts.insert((job, key.to_string()), seq);
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proposal(self, proposal: Proposal) -> Self {
        self.state
            .lock()
            .unwrap()
            .proposals
            .insert(proposal.id.clone(), proposal);
        self
    }

    pub fn with_order(self, order: LocalOrder) -> Self {
        self.state.lock().unwrap().orders.push(order);
        self
    }

    pub fn with_installment(self, installment: CommissionInstallment) -> Self {
        self.state.lock().unwrap().installments.push(installment);
        self
    }

    pub fn failing(self, write: FailingWrite) -> Self {
        self.state.lock().unwrap().failing = Some(write);
        self
    }

    pub fn proposal(&self, id: &str) -> Option<Proposal> {
        self.state.lock().unwrap().proposals.get(id).cloned()
    }

    pub fn order(&self, id: &str) -> Option<LocalOrder> {
        self.state
            .lock()
            .unwrap()
            .orders
            .iter()
            .find(|o| o.id == id)
            .cloned()
    }

    pub fn sales(&self) -> Vec<RecognizedSale> {
        self.state.lock().unwrap().sales.clone()
    }

    pub fn installments(&self) -> Vec<CommissionInstallment> {
        self.state.lock().unwrap().installments.clone()
    }

    fn check(&self, state: &LedgerState, write: FailingWrite) -> RepositoryResult<()> {
        if state.failing == Some(write) {
            return Err(RepositoryError::Storage(format!("{:?} refused", write)));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for MemoryLedger {
    async fn get_proposal(&self, proposal_id: &str) -> RepositoryResult<Option<Proposal>> {
        Ok(self.proposal(proposal_id))
    }

    async fn mark_proposal_settled(
        &self,
        proposal_id: &str,
        external_order_id: &str,
        external_order_number: &str,
    ) -> RepositoryResult<()> {
        let mut state = self.state.lock().unwrap();
        self.check(&state, FailingWrite::MarkSettled)?;
        let proposal = state
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| RepositoryError::NotFound(proposal_id.to_string()))?;
        if proposal.status != ProposalStatus::Approved {
            return Err(RepositoryError::Conflict(format!(
                "proposal {} is {}",
                proposal_id,
                proposal.status.as_str()
            )));
        }
        proposal.status = ProposalStatus::Invoiced;
        proposal.external_order_id = Some(external_order_id.to_string());
        proposal.external_order_number = Some(external_order_number.to_string());
        Ok(())
    }

    async fn insert_recognized_sale(&self, sale: &RecognizedSale) -> RepositoryResult<()> {
        let mut state = self.state.lock().unwrap();
        self.check(&state, FailingWrite::RecognizedSale)?;
        state.sales.push(sale.clone());
        Ok(())
    }

    async fn insert_installments(&self, installments: &[CommissionInstallment]) -> RepositoryResult<()> {
        let mut state = self.state.lock().unwrap();
        self.check(&state, FailingWrite::Installments)?;
        let parents: BTreeSet<&str> = installments.iter().map(|i| i.parent_ref.as_str()).collect();
        if state
            .installments
            .iter()
            .any(|existing| parents.contains(existing.parent_ref.as_str()))
        {
            return Err(RepositoryError::Conflict("schedule already exists".to_string()));
        }
        state.installments.extend_from_slice(installments);
        Ok(())
    }

    async fn installment_count(&self, parent_ref: &str) -> RepositoryResult<u32> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .installments
            .iter()
            .filter(|i| i.parent_ref == parent_ref)
            .count() as u32)
    }

    async fn list_unlinked_orders(
        &self,
        limit: u32,
        excluded_prefixes: &[String],
    ) -> RepositoryResult<Vec<LocalOrder>> {
        let state = self.state.lock().unwrap();
        let mut unlinked: Vec<LocalOrder> = state
            .orders
            .iter()
            .filter(|o| o.external_order_id.is_none())
            .filter(|o| match o.store_order_number.as_deref() {
                Some(number) => {
                    !number.trim().is_empty() && !has_internal_prefix(number, excluded_prefixes)
                }
                None => false,
            })
            .cloned()
            .collect();
        unlinked.sort_by(|a, b| {
            (state.attempt_rank("linkage", &a.id), a.order_date, &a.id)
                .cmp(&(state.attempt_rank("linkage", &b.id), b.order_date, &b.id))
        });
        unlinked.truncate(limit as usize);
        Ok(unlinked)
    }

    async fn record_linkage_attempt(&self, order_id: &str) -> RepositoryResult<()> {
        self.state.lock().unwrap().record_attempt("linkage", order_id);
        Ok(())
    }

    async fn link_order(&self, order_id: &str, external_order_id: &str) -> RepositoryResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.orders.iter_mut().find(|o| o.id == order_id) {
            Some(order) if order.external_order_id.is_none() => {
                order.external_order_id = Some(external_order_id.to_string());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(order_id.to_string())),
        }
    }

    async fn list_pending_document_links(&self, limit: u32) -> RepositoryResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        let mut ids = BTreeSet::new();
        for order in &state.orders {
            if let (Some(id), None) = (&order.external_order_id, &order.fiscal_document_url) {
                ids.insert(id.clone());
            }
        }
        for installment in &state.installments {
            if let (Some(id), None) = (&installment.external_order_id, &installment.fiscal_document_url) {
                ids.insert(id.clone());
            }
        }
        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort_by_key(|id| state.attempt_rank("documents", id));
        ids.truncate(limit as usize);
        Ok(ids)
    }

    async fn record_document_attempt(&self, external_order_id: &str) -> RepositoryResult<()> {
        self.state
            .lock()
            .unwrap()
            .record_attempt("documents", external_order_id);
        Ok(())
    }

    async fn apply_fiscal_document(
        &self,
        external_order_id: &str,
        link: &FiscalDocumentLink,
    ) -> RepositoryResult<u64> {
        let mut state = self.state.lock().unwrap();
        self.check(&state, FailingWrite::ApplyDocument)?;
        let mut updated = 0;
        for order in state.orders.iter_mut() {
            if order.external_order_id.as_deref() == Some(external_order_id)
                && order.fiscal_document_url.is_none()
            {
                order.fiscal_document_number = Some(link.document_number.clone());
                order.fiscal_document_url = Some(link.printable_url.clone());
                updated += 1;
            }
        }
        for installment in state.installments.iter_mut() {
            if installment.external_order_id.as_deref() == Some(external_order_id)
                && installment.fiscal_document_url.is_none()
            {
                installment.fiscal_document_number = Some(link.document_number.clone());
                installment.fiscal_document_url = Some(link.printable_url.clone());
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn settlement_progress(&self, proposal_id: &str) -> RepositoryResult<Option<SettlementProgress>> {
        let state = self.state.lock().unwrap();
        let Some(proposal) = state.proposals.get(proposal_id) else {
            return Ok(None);
        };
        let progress = if state.installments.iter().any(|i| i.parent_ref == proposal_id) {
            SettlementProgress::InstallmentsGenerated
        } else if state.sales.iter().any(|s| s.proposal_id == proposal_id) {
            SettlementProgress::LedgerRecorded
        } else if proposal.external_order_id.is_some() {
            SettlementProgress::Linked
        } else {
            SettlementProgress::NotStarted
        };
        Ok(Some(progress))
    }
}
