pub mod document_resolver;
pub mod installment_schedule;
pub mod order_matcher;
pub mod reconciliation;
pub mod settlement;
