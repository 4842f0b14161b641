//! Database Models
//!
//! Row types for the ledger tables and their conversion into domain entities.
//! Amounts are stored as integer cents and enum columns as their canonical strings.

use crate::domain::entities::installment::{CommissionInstallment, InstallmentOrigin, PaymentStatus};
use crate::domain::entities::local_order::LocalOrder;
use crate::domain::entities::proposal::{DeliveryAddress, Proposal, ProposalItem, ProposalStatus};
use crate::domain::errors::RepositoryError;
use crate::domain::value_objects::money::Money;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

/// Proposal record in database
#[derive(Debug, Clone, FromRow)]
pub struct ProposalRecord {
    pub id: String,
    pub number: String,
    pub status: String,
    pub customer_external_id: String,
    pub customer_name: String,
    pub agent_id: String,
    pub agent_external_id: Option<String>,
    pub commission_rate_pct: f64,
    pub payment_terms: String,
    pub blanket_discount_pct: f64,
    pub freight_cents: i64,
    pub delivery_address_json: Option<String>,
    pub notes: Option<String>,
    pub issued_on: NaiveDate,
    pub external_order_id: Option<String>,
    pub external_order_number: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Proposal item record in database
#[derive(Debug, Clone, FromRow)]
pub struct ProposalItemRecord {
    pub id: String,
    pub proposal_id: String,
    pub position: i64,
    pub description: String,
    pub external_product_code: Option<String>,
    pub quantity: f64,
    pub unit_price_cents: i64,
    pub list_price_cents: i64,
    pub discount_pct: Option<f64>,
}

/// Local order record in database
#[derive(Debug, Clone, FromRow)]
pub struct OrderRecord {
    pub id: String,
    pub store_order_number: Option<String>,
    pub total_cents: i64,
    pub order_date: NaiveDate,
    pub external_order_id: Option<String>,
    pub fiscal_document_number: Option<String>,
    pub fiscal_document_url: Option<String>,
}

/// Commission installment record in database
#[derive(Debug, Clone, FromRow)]
pub struct InstallmentRecord {
    pub parent_ref: String,
    pub agent_id: String,
    pub installment_index: i64,
    pub installment_count: i64,
    pub gross_cents: i64,
    pub commission_cents: i64,
    pub due_date: NaiveDate,
    pub status: String,
    pub origin: String,
    pub external_order_id: Option<String>,
    pub fiscal_document_number: Option<String>,
    pub fiscal_document_url: Option<String>,
}

impl ProposalRecord {
    pub fn into_domain(self, items: Vec<ProposalItemRecord>) -> Result<Proposal, RepositoryError> {
        let status = ProposalStatus::parse(&self.status).ok_or_else(|| {
            RepositoryError::Storage(format!("proposal {} has unknown status '{}'", self.id, self.status))
        })?;

        let delivery_address = match self.delivery_address_json.as_deref() {
            Some(json) if !json.trim().is_empty() => Some(
                serde_json::from_str::<DeliveryAddress>(json).map_err(|e| {
                    RepositoryError::Storage(format!("proposal {} has invalid address: {}", self.id, e))
                })?,
            ),
            _ => None,
        };

        Ok(Proposal {
            id: self.id,
            number: self.number,
            status,
            customer_external_id: self.customer_external_id,
            customer_name: self.customer_name,
            agent_id: self.agent_id,
            agent_external_id: self.agent_external_id,
            commission_rate_pct: self.commission_rate_pct,
            payment_terms: self.payment_terms,
            blanket_discount_pct: self.blanket_discount_pct,
            freight: Money::from_cents(self.freight_cents),
            delivery_address,
            notes: self.notes,
            issued_on: self.issued_on,
            items: items.into_iter().map(ProposalItem::from).collect(),
            external_order_id: self.external_order_id,
            external_order_number: self.external_order_number,
        })
    }
}

impl From<ProposalItemRecord> for ProposalItem {
    fn from(record: ProposalItemRecord) -> Self {
        ProposalItem {
            id: record.id,
            description: record.description,
            external_product_code: record.external_product_code,
            quantity: record.quantity,
            unit_price: Money::from_cents(record.unit_price_cents),
            list_price: Money::from_cents(record.list_price_cents),
            discount_pct: record.discount_pct,
        }
    }
}

impl From<OrderRecord> for LocalOrder {
    fn from(record: OrderRecord) -> Self {
        LocalOrder {
            id: record.id,
            store_order_number: record.store_order_number,
            total: Money::from_cents(record.total_cents),
            order_date: record.order_date,
            external_order_id: record.external_order_id,
            fiscal_document_number: record.fiscal_document_number,
            fiscal_document_url: record.fiscal_document_url,
        }
    }
}

impl TryFrom<InstallmentRecord> for CommissionInstallment {
    type Error = RepositoryError;

    fn try_from(record: InstallmentRecord) -> Result<Self, Self::Error> {
        let status = PaymentStatus::parse(&record.status)
            .ok_or_else(|| RepositoryError::Storage(format!("unknown payment status '{}'", record.status)))?;
        let origin = InstallmentOrigin::parse(&record.origin)
            .ok_or_else(|| RepositoryError::Storage(format!("unknown installment origin '{}'", record.origin)))?;

        Ok(CommissionInstallment {
            parent_ref: record.parent_ref,
            agent_id: record.agent_id,
            installment_index: record.installment_index as u32,
            installment_count: record.installment_count as u32,
            gross_amount: Money::from_cents(record.gross_cents),
            commission_amount: Money::from_cents(record.commission_cents),
            due_date: record.due_date,
            status,
            origin,
            external_order_id: record.external_order_id,
            fiscal_document_number: record.fiscal_document_number,
            fiscal_document_url: record.fiscal_document_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: &str) -> ProposalRecord {
        ProposalRecord {
            id: "p-1".to_string(),
            number: "P-1".to_string(),
            status: status.to_string(),
            customer_external_id: "C-77".to_string(),
            customer_name: "Cliente".to_string(),
            agent_id: "agent-1".to_string(),
            agent_external_id: None,
            commission_rate_pct: 1.5,
            payment_terms: "60_90".to_string(),
            blanket_discount_pct: 0.0,
            freight_cents: 1500,
            delivery_address_json: None,
            notes: None,
            issued_on: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            external_order_id: None,
            external_order_number: None,
            settled_at: None,
        }
    }

    #[test]
    fn test_proposal_record_into_domain() {
        let proposal = record("APROVADO").into_domain(Vec::new()).unwrap();
        assert_eq!(proposal.status, ProposalStatus::Approved);
        assert_eq!(proposal.freight.cents(), 1500);
        assert!(proposal.delivery_address.is_none());
    }

    #[test]
    fn test_unknown_status_is_storage_error() {
        assert!(matches!(
            record("??").into_domain(Vec::new()),
            Err(RepositoryError::Storage(_))
        ));
    }

    #[test]
    fn test_invalid_address_json_is_storage_error() {
        let mut r = record("APROVADO");
        r.delivery_address_json = Some("{not json".to_string());
        assert!(matches!(r.into_domain(Vec::new()), Err(RepositoryError::Storage(_))));
    }
}
