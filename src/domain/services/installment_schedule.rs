//! Commission installment schedule for a settled order.

use crate::domain::entities::installment::{CommissionInstallment, InstallmentOrigin, PaymentStatus};
use crate::domain::value_objects::money::Money;
use crate::domain::value_objects::payment_terms::InstallmentPlan;
use chrono::NaiveDate;

pub struct ScheduleRequest<'a> {
    pub parent_ref: &'a str,
    pub agent_id: &'a str,
    pub total: Money,
    pub commission_rate_pct: f64,
    pub plan: &'a InstallmentPlan,
    pub start: NaiveDate,
    pub external_order_id: Option<&'a str>,
    pub origin: InstallmentOrigin,
}

/// Splits the total into the plan's installments (remainder cents on the last one)
/// and computes each commission from its own installment amount.
pub fn build_schedule(request: &ScheduleRequest<'_>) -> Vec<CommissionInstallment> {
    let count = request.plan.installment_count();
    let amounts = request.total.split(count);
    let due_dates = request.plan.due_dates(request.start);

    amounts
        .into_iter()
        .zip(due_dates)
        .enumerate()
        .map(|(i, (gross_amount, due_date))| CommissionInstallment {
            parent_ref: request.parent_ref.to_string(),
            agent_id: request.agent_id.to_string(),
            installment_index: i as u32 + 1,
            installment_count: count,
            gross_amount,
            commission_amount: gross_amount.percentage(request.commission_rate_pct),
            due_date,
            status: PaymentStatus::Awaiting,
            origin: request.origin,
            external_order_id: request.external_order_id.map(str::to_string),
            fiscal_document_number: None,
            fiscal_document_url: None,
        })
        .collect()
}

pub fn commission_total(installments: &[CommissionInstallment]) -> Money {
    installments.iter().map(|i| i.commission_amount).sum()
}
