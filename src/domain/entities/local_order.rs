use crate::domain::value_objects::money::Money;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A sale recorded in the local ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalOrder {
    pub id: String,
    pub store_order_number: Option<String>,
    pub total: Money,
    pub order_date: NaiveDate,
    /// Set once matched; never cleared by this crate.
    pub external_order_id: Option<String>,
    pub fiscal_document_number: Option<String>,
    pub fiscal_document_url: Option<String>,
}

impl LocalOrder {
    pub fn is_linked(&self) -> bool {
        self.external_order_id.is_some()
    }

    pub fn has_fiscal_document(&self) -> bool {
        self.fiscal_document_url.is_some()
    }
}

/// Authorized fiscal document resolved for an external order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalDocumentLink {
    pub document_id: String,
    pub document_number: String,
    pub authorization_status: i64,
    pub printable_url: String,
}

/// Result of one matching attempt; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched_external_id: String,
    pub strategy_used: MatchStrategy,
    pub confidence: MatchConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    ExactNumber,
    ValueDateWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    High,
    Medium,
}

impl MatchStrategy {
    pub fn confidence(&self) -> MatchConfidence {
        match self {
            MatchStrategy::ExactNumber => MatchConfidence::High,
            MatchStrategy::ValueDateWindow => MatchConfidence::Medium,
        }
    }
}
