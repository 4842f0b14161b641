//! ledgersync
//!
//! Keeps a local order and commission ledger consistent with an external ERP:
//! settles approved proposals into ERP orders with commission schedules, and
//! backfills order linkage and fiscal document links.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod secrets;
pub mod task_runner;
