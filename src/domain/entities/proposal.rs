//! Commercial proposal: the source document of a settlement.

use crate::domain::value_objects::money::Money;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    Draft,
    /// Commercially approved, waiting to be invoiced. The only status a settlement accepts.
    Approved,
    /// Settled: the external order exists and is linked.
    Invoiced,
    Cancelled,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Draft => "RASCUNHO",
            ProposalStatus::Approved => "APROVADO",
            ProposalStatus::Invoiced => "FATURADO",
            ProposalStatus::Cancelled => "CANCELADO",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "RASCUNHO" => Some(ProposalStatus::Draft),
            "APROVADO" => Some(ProposalStatus::Approved),
            "FATURADO" => Some(ProposalStatus::Invoiced),
            "CANCELADO" => Some(ProposalStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub district: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl DeliveryAddress {
    pub fn is_complete(&self) -> bool {
        [
            &self.street,
            &self.number,
            &self.district,
            &self.city,
            &self.state,
            &self.postal_code,
        ]
        .iter()
        .all(|f| !f.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalItem {
    pub id: String,
    pub description: String,
    /// Product code in the ERP catalog; settlement refuses items without one.
    pub external_product_code: Option<String>,
    pub quantity: f64,
    pub unit_price: Money,
    pub list_price: Money,
    /// Overrides the proposal's blanket discount when set.
    pub discount_pct: Option<f64>,
}

impl ProposalItem {
    pub fn effective_discount(&self, blanket_pct: f64) -> f64 {
        self.discount_pct.unwrap_or(blanket_pct)
    }

    /// Discounted unit price, rounded to the cent. This is the price the ERP receives.
    pub fn net_unit_price(&self, blanket_pct: f64) -> Money {
        let discount = self.effective_discount(blanket_pct);
        let net = self.unit_price.cents() as f64 * (1.0 - discount / 100.0);
        Money::from_cents(net.round() as i64)
    }

    /// Rounded net unit price times quantity, rounded to the cent.
    pub fn line_total(&self, blanket_pct: f64) -> Money {
        let cents = self.net_unit_price(blanket_pct).cents() as f64 * self.quantity;
        Money::from_cents(cents.round() as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub number: String,
    pub status: ProposalStatus,
    pub customer_external_id: String,
    pub customer_name: String,
    pub agent_id: String,
    pub agent_external_id: Option<String>,
    /// Agent commission in percent (1.5 = 1.5%).
    pub commission_rate_pct: f64,
    pub payment_terms: String,
    pub blanket_discount_pct: f64,
    pub freight: Money,
    pub delivery_address: Option<DeliveryAddress>,
    pub notes: Option<String>,
    pub issued_on: NaiveDate,
    pub items: Vec<ProposalItem>,
    pub external_order_id: Option<String>,
    pub external_order_number: Option<String>,
}

/// Totals sent to the ERP and used for the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProposalTotals {
    pub items_total: Money,
    pub freight: Money,
    pub grand_total: Money,
}

impl Proposal {
    /// Sum of the rounded line totals, so the ERP's own line arithmetic adds up to the same value.
    pub fn totals(&self) -> ProposalTotals {
        let items_cents: i64 = self
            .items
            .iter()
            .map(|item| item.line_total(self.blanket_discount_pct).cents())
            .sum();
        let items_total = Money::from_cents(items_cents);
        let grand_total = Money::from_cents(items_cents + self.freight.cents());

        ProposalTotals {
            items_total,
            freight: self.freight,
            grand_total,
        }
    }

    /// Items missing an ERP product code, by description.
    pub fn items_missing_product_code(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|item| {
                item.external_product_code
                    .as_deref()
                    .map_or(true, |code| code.trim().is_empty())
            })
            .map(|item| format!("{} ({})", item.description, item.id))
            .collect()
    }
}
