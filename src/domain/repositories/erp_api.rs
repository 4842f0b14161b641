//! ERP API Trait
//!
//! The operations this crate needs from the external ERP, independent of the
//! HTTP shape. The HTTP implementation lives in `infrastructure::erp_client`;
//! tests substitute in-memory fakes.
//!
//! Order and document details are returned as raw JSON because the ERP has
//! varied where it exposes fiscal-document references across versions; the
//! resolver owns the extraction rules.

use crate::domain::errors::GatewayError;
use crate::domain::value_objects::money::Money;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type ErpResult<T> = Result<T, GatewayError>;

/// Outcome of a lookup where a 404 is an expected answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }
}

/// Entry of an order search listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalOrderSummary {
    pub id: String,
    pub number: Option<String>,
    pub store_number: Option<String>,
    pub date: Option<NaiveDate>,
    pub total: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalOrderItem {
    pub code: String,
    pub description: String,
    pub quantity: f64,
    /// Net unit price with every discount already applied. No discount field
    /// travels with it, so the ERP cannot discount twice.
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalInstallment {
    pub due_date: NaiveDate,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalAddress {
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub district: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateOrderRequest {
    pub contact_id: String,
    pub order_date: NaiveDate,
    /// Local proposal number, echoed back by the ERP as the store number.
    pub store_number: String,
    pub items: Vec<ExternalOrderItem>,
    pub items_total: Money,
    pub freight: Money,
    pub grand_total: Money,
    pub delivery_address: ExternalAddress,
    pub payment_terms: String,
    pub installments: Vec<ExternalInstallment>,
    pub salesperson_id: Option<String>,
    pub notes: Option<String>,
}

/// Identifiers the ERP acknowledged for a created order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedOrder {
    pub id: String,
    pub number: String,
}

#[async_trait]
pub trait ErpApi: Send + Sync {
    /// Orders whose store-number filter matches. The ERP filter may be fuzzy.
    async fn search_orders_by_store_number(
        &self,
        store_number: &str,
    ) -> ErpResult<Vec<ExternalOrderSummary>>;

    /// One page (1-based) of orders dated within `[from, to]`.
    async fn search_orders_by_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        page: u32,
        page_size: u32,
    ) -> ErpResult<Vec<ExternalOrderSummary>>;

    async fn get_order(&self, order_id: &str) -> ErpResult<Lookup<serde_json::Value>>;

    /// Fiscal documents filtered by their originating order.
    async fn list_documents_for_order(&self, order_id: &str) -> ErpResult<Vec<serde_json::Value>>;

    async fn get_fiscal_document(&self, document_id: &str) -> ErpResult<Lookup<serde_json::Value>>;

    /// Raw acknowledgment; callers must check it carries an id or number.
    async fn create_order(&self, request: &CreateOrderRequest) -> ErpResult<serde_json::Value>;
}
