pub mod credential_store;
pub mod erp_api;
pub mod ledger_repository;

#[cfg(test)]
pub(crate) mod fakes;
