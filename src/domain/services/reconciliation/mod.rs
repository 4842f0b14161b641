//! Reconciliation module
//!
//! Idempotent backfill sweeps that move local records from unlinked to linked
//! and from linked to fiscal-document-resolved. Both run sequentially with a
//! fixed delay between items and stop at the next item boundary when cancelled.

pub mod document_backfill;
pub mod linkage_backfill;
pub mod report;

pub use document_backfill::DocumentBackfill;
pub use linkage_backfill::LinkageBackfill;
pub use report::*;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleeps for `delay`. Returns false when cancellation arrived first.
pub(crate) async fn pause_between_items(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
