use crate::domain::value_objects::money::Money;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Awaiting,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Awaiting => "AGUARDANDO",
            PaymentStatus::Paid => "PAGO",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "AGUARDANDO" => Some(PaymentStatus::Awaiting),
            "PAGO" => Some(PaymentStatus::Paid),
            _ => None,
        }
    }
}

/// How an installment row came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallmentOrigin {
    Invoiced,
    OnlinePaid,
    Manual,
}

impl InstallmentOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentOrigin::Invoiced => "faturado",
            InstallmentOrigin::OnlinePaid => "pago_online",
            InstallmentOrigin::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "faturado" => Some(InstallmentOrigin::Invoiced),
            "pago_online" => Some(InstallmentOrigin::OnlinePaid),
            "manual" => Some(InstallmentOrigin::Manual),
            _ => None,
        }
    }
}

/// One scheduled payment owed to a sales agent for a settled order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionInstallment {
    /// Proposal or order the schedule belongs to. One schedule per parent.
    pub parent_ref: String,
    pub agent_id: String,
    /// 1-based.
    pub installment_index: u32,
    pub installment_count: u32,
    pub gross_amount: Money,
    pub commission_amount: Money,
    pub due_date: NaiveDate,
    pub status: PaymentStatus,
    pub origin: InstallmentOrigin,
    pub external_order_id: Option<String>,
    pub fiscal_document_number: Option<String>,
    pub fiscal_document_url: Option<String>,
}

/// Denormalized sale record consumed by quota and reporting features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedSale {
    pub proposal_id: String,
    pub external_order_id: String,
    pub external_order_number: String,
    pub agent_id: String,
    pub customer_name: String,
    pub total: Money,
    pub recognized_on: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(PaymentStatus::parse(PaymentStatus::Awaiting.as_str()), Some(PaymentStatus::Awaiting));
        assert_eq!(PaymentStatus::parse(PaymentStatus::Paid.as_str()), Some(PaymentStatus::Paid));
        assert_eq!(PaymentStatus::parse("x"), None);
    }

    #[test]
    fn test_origin_strings() {
        for origin in [
            InstallmentOrigin::Invoiced,
            InstallmentOrigin::OnlinePaid,
            InstallmentOrigin::Manual,
        ] {
            assert_eq!(InstallmentOrigin::parse(origin.as_str()), Some(origin));
        }
    }
}
