pub mod credential;
pub mod installment;
pub mod local_order;
pub mod proposal;
