pub mod money;
pub mod order_number;
pub mod payment_terms;
