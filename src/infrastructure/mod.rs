pub mod credential_manager;
pub mod erp_client;
pub mod erp_gateway;
