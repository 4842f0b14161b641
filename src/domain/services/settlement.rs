//! Settlement Orchestrator
//!
//! Turns an approved proposal into an ERP order, a recognized sale and a
//! commission schedule. Stages run in order:
//!
//! `Validating -> ExternalOrderCreating -> LinkagePersisting -> LedgerRecording -> InstallmentsGenerating -> Done`
//!
//! Every failure carries the stage it happened in. Once the ERP order exists,
//! local failures become `PartialSettlementFailure` with the ERP order number,
//! and nothing is retried or rolled back automatically. Re-running a settled
//! proposal fails validation because its status has moved on.

use crate::domain::entities::installment::{InstallmentOrigin, RecognizedSale};
use crate::domain::entities::proposal::{DeliveryAddress, Proposal, ProposalStatus, ProposalTotals};
use crate::domain::errors::{SettlementError, SettlementStage};
use crate::domain::repositories::erp_api::{
    CreateOrderRequest, CreatedOrder, ErpApi, ExternalAddress, ExternalInstallment, ExternalOrderItem,
};
use crate::domain::repositories::ledger_repository::LedgerRepository;
use crate::domain::services::installment_schedule::{build_schedule, commission_total, ScheduleRequest};
use crate::domain::value_objects::money::Money;
use crate::domain::value_objects::payment_terms::{known_codes, InstallmentPlan};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementSummary {
    pub proposal_id: String,
    pub external_order_id: String,
    pub external_order_number: String,
    pub installment_count: u32,
    pub total: Money,
    pub commission_total: Money,
}

/// Everything validation established; later stages never re-check it.
struct ValidatedProposal {
    proposal: Proposal,
    totals: ProposalTotals,
    plan: InstallmentPlan,
    address: DeliveryAddress,
}

pub struct SettlementOrchestrator {
    erp: Arc<dyn ErpApi>,
    ledger: Arc<dyn LedgerRepository>,
}

impl SettlementOrchestrator {
    pub fn new(erp: Arc<dyn ErpApi>, ledger: Arc<dyn LedgerRepository>) -> Self {
        Self { erp, ledger }
    }

    pub async fn settle(&self, proposal_id: &str) -> Result<SettlementSummary, SettlementError> {
        self.settle_on(proposal_id, Utc::now().date_naive()).await
    }

    /// Settles with `on` as order date and installment start date.
    pub async fn settle_on(
        &self,
        proposal_id: &str,
        on: NaiveDate,
    ) -> Result<SettlementSummary, SettlementError> {
        info!("Settling proposal {}", proposal_id);

        let validated = self.validate(proposal_id).await?;
        let created = self.create_external_order(&validated, on).await?;

        let partial = |stage: SettlementStage, reason: String| {
            error!(
                "Settlement of proposal {} failed at {} after ERP order {} (id {}) was created: {}",
                proposal_id, stage, created.number, created.id, reason
            );
            SettlementError::PartialSettlementFailure {
                stage,
                external_order_id: created.id.clone(),
                external_order_number: created.number.clone(),
                reason,
            }
        };

        let proposal = &validated.proposal;

        // LinkagePersisting
        self.ledger
            .mark_proposal_settled(&proposal.id, &created.id, &created.number)
            .await
            .map_err(|e| partial(SettlementStage::LinkagePersisting, e.to_string()))?;
        debug!("Proposal {} linked to ERP order {}", proposal.id, created.id);

        // LedgerRecording
        let sale = RecognizedSale {
            proposal_id: proposal.id.clone(),
            external_order_id: created.id.clone(),
            external_order_number: created.number.clone(),
            agent_id: proposal.agent_id.clone(),
            customer_name: proposal.customer_name.clone(),
            total: validated.totals.grand_total,
            recognized_on: on,
        };
        self.ledger
            .insert_recognized_sale(&sale)
            .await
            .map_err(|e| partial(SettlementStage::LedgerRecording, e.to_string()))?;

        // InstallmentsGenerating
        let installments = build_schedule(&ScheduleRequest {
            parent_ref: &proposal.id,
            agent_id: &proposal.agent_id,
            total: validated.totals.grand_total,
            commission_rate_pct: proposal.commission_rate_pct,
            plan: &validated.plan,
            start: on,
            external_order_id: Some(&created.id),
            origin: InstallmentOrigin::Invoiced,
        });
        self.ledger
            .insert_installments(&installments)
            .await
            .map_err(|e| partial(SettlementStage::InstallmentsGenerating, e.to_string()))?;

        let summary = SettlementSummary {
            proposal_id: proposal.id.clone(),
            external_order_id: created.id,
            external_order_number: created.number,
            installment_count: installments.len() as u32,
            total: validated.totals.grand_total,
            commission_total: commission_total(&installments),
        };
        info!(
            "Proposal {} settled as ERP order {}: {} installments, total {}, commission {}",
            summary.proposal_id,
            summary.external_order_number,
            summary.installment_count,
            summary.total,
            summary.commission_total
        );
        Ok(summary)
    }

    /// Collects every violation before failing, so the operator can fix them in one pass.
    async fn validate(&self, proposal_id: &str) -> Result<ValidatedProposal, SettlementError> {
        let invalid = |violations: Vec<String>| SettlementError::InvalidState {
            proposal_id: proposal_id.to_string(),
            violations,
        };

        let proposal = self
            .ledger
            .get_proposal(proposal_id)
            .await
            .map_err(|e| SettlementError::Failed {
                stage: SettlementStage::Validating,
                reason: e.to_string(),
            })?
            .ok_or_else(|| invalid(vec!["proposal not found".to_string()]))?;

        let mut violations = Vec::new();

        if proposal.status != ProposalStatus::Approved {
            violations.push(format!(
                "status is {}, expected {}",
                proposal.status,
                ProposalStatus::Approved
            ));
        }
        if proposal.items.is_empty() {
            violations.push("proposal has no items".to_string());
        }
        for item in proposal.items_missing_product_code() {
            violations.push(format!("item {} has no ERP product code", item));
        }
        if proposal.customer_external_id.trim().is_empty() {
            violations.push("customer has no ERP contact id".to_string());
        }

        let plan = InstallmentPlan::from_code(&proposal.payment_terms);
        if plan.is_none() {
            violations.push(format!(
                "unknown payment terms '{}' (known: {})",
                proposal.payment_terms,
                known_codes().join(", ")
            ));
        }

        let rate = proposal.commission_rate_pct;
        if !rate.is_finite() || !(0.0..=100.0).contains(&rate) {
            violations.push(format!("commission rate {} is outside 0..=100", rate));
        }

        let address = proposal.delivery_address.clone().filter(DeliveryAddress::is_complete);
        if address.is_none() {
            violations.push("delivery address is missing or incomplete".to_string());
        }

        let totals = proposal.totals();
        if !totals.grand_total.is_positive() {
            violations.push(format!("grand total {} must be positive", totals.grand_total));
        }

        match (plan, address) {
            (Some(plan), Some(address)) if violations.is_empty() => Ok(ValidatedProposal {
                proposal,
                totals,
                plan,
                address,
            }),
            _ => {
                info!(
                    "Proposal {} rejected with {} violation(s)",
                    proposal_id,
                    violations.len()
                );
                Err(invalid(violations))
            }
        }
    }

    async fn create_external_order(
        &self,
        validated: &ValidatedProposal,
        on: NaiveDate,
    ) -> Result<CreatedOrder, SettlementError> {
        let request = build_order_request(validated, on);
        let failed = |reason: String| SettlementError::Failed {
            stage: SettlementStage::ExternalOrderCreating,
            reason,
        };

        let ack = self
            .erp
            .create_order(&request)
            .await
            .map_err(|e| failed(e.to_string()))?;

        parse_created_order(&ack).ok_or_else(|| {
            error!(
                "ERP acknowledged order for proposal {} without id or number: {}",
                validated.proposal.id, ack
            );
            failed("ERP response carried no order id or number".to_string())
        })
    }
}

fn build_order_request(validated: &ValidatedProposal, on: NaiveDate) -> CreateOrderRequest {
    let proposal = &validated.proposal;
    let blanket = proposal.blanket_discount_pct;

    let items = proposal
        .items
        .iter()
        .map(|item| ExternalOrderItem {
            code: item
                .external_product_code
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.net_unit_price(blanket),
        })
        .collect();

    let installments = validated
        .totals
        .grand_total
        .split(validated.plan.installment_count())
        .into_iter()
        .zip(validated.plan.due_dates(on))
        .map(|(amount, due_date)| ExternalInstallment { due_date, amount })
        .collect();

    let address = &validated.address;
    CreateOrderRequest {
        contact_id: proposal.customer_external_id.clone(),
        order_date: on,
        store_number: proposal.number.clone(),
        items,
        items_total: validated.totals.items_total,
        freight: validated.totals.freight,
        grand_total: validated.totals.grand_total,
        delivery_address: ExternalAddress {
            street: address.street.clone(),
            number: address.number.clone(),
            complement: address.complement.clone(),
            district: address.district.clone(),
            city: address.city.clone(),
            state: address.state.clone(),
            postal_code: address.postal_code.clone(),
        },
        payment_terms: validated.plan.code().to_string(),
        installments,
        salesperson_id: proposal.agent_external_id.clone(),
        notes: proposal.notes.clone(),
    }
}

/// Reads `{id, numero}` from the acknowledgment, with or without a `data` envelope.
/// Either field alone is enough; the other falls back to it.
pub fn parse_created_order(ack: &Value) -> Option<CreatedOrder> {
    let body = ack.get("data").filter(|d| d.is_object()).unwrap_or(ack);
    let field = |names: &[&str]| {
        names.iter().find_map(|name| match body.get(*name) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) if n.as_i64() != Some(0) => Some(n.to_string()),
            _ => None,
        })
    };

    let id = field(&["id", "idPedido"]);
    let number = field(&["numero", "number"]);
    match (id, number) {
        (Some(id), Some(number)) => Some(CreatedOrder { id, number }),
        (Some(id), None) => Some(CreatedOrder { number: id.clone(), id }),
        (None, Some(number)) => Some(CreatedOrder { id: number.clone(), number }),
        (None, None) => None,
    }
}
