pub mod ledger_sync_service;

pub use ledger_sync_service::{LedgerSyncService, ServiceError};
