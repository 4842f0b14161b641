use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Unrecoverable without operator action (rotate or re-seed credentials).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CredentialError {
    #[error("Missing credential field: {0}")]
    MissingField(&'static str),

    #[error("Token refresh rejected by provider ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Token endpoint unreachable: {0}")]
    Transport(String),

    #[error("Malformed token response: {0}")]
    MalformedResponse(String),

    #[error("Failed to persist refreshed tokens: {0}")]
    Persistence(String),
}

/// Terminal failures of a call through the ERP gateway.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Token rejected after refresh: {0}")]
    Auth(String),

    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("External API error ({status}): {body}")]
    ExternalApi { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),
}

impl GatewayError {
    /// Auth and credential failures affect every call, so sweeps stop on them.
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(
            self,
            GatewayError::Credential(_) | GatewayError::Auth(_) | GatewayError::RateLimitExceeded { .. }
        )
    }
}

/// Local ledger storage failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Stages of the settlement workflow, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SettlementStage {
    Validating,
    ExternalOrderCreating,
    LinkagePersisting,
    LedgerRecording,
    InstallmentsGenerating,
    Done,
}

impl fmt::Display for SettlementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettlementStage::Validating => "validating",
            SettlementStage::ExternalOrderCreating => "external_order_creating",
            SettlementStage::LinkagePersisting => "linkage_persisting",
            SettlementStage::LedgerRecording => "ledger_recording",
            SettlementStage::InstallmentsGenerating => "installments_generating",
            SettlementStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SettlementError {
    #[error("Proposal {proposal_id} cannot be settled: {}", .violations.join("; "))]
    InvalidState {
        proposal_id: String,
        violations: Vec<String>,
    },

    #[error("Settlement failed at {stage}: {reason}")]
    Failed {
        stage: SettlementStage,
        reason: String,
    },

    #[error(
        "Order {external_order_number} (id {external_order_id}) WAS CREATED in the ERP, but {stage} failed: {reason}. Reconcile manually."
    )]
    PartialSettlementFailure {
        stage: SettlementStage,
        external_order_id: String,
        external_order_number: String,
        reason: String,
    },
}

impl SettlementError {
    pub fn stage(&self) -> SettlementStage {
        match self {
            SettlementError::InvalidState { .. } => SettlementStage::Validating,
            SettlementError::Failed { stage, .. } => *stage,
            SettlementError::PartialSettlementFailure { stage, .. } => *stage,
        }
    }

    /// The ERP-side order number when the external side effect already happened.
    pub fn external_order_number(&self) -> Option<&str> {
        match self {
            SettlementError::PartialSettlementFailure {
                external_order_number,
                ..
            } => Some(external_order_number),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_message_names_external_order() {
        let err = SettlementError::PartialSettlementFailure {
            stage: SettlementStage::LinkagePersisting,
            external_order_id: "9001".to_string(),
            external_order_number: "4512".to_string(),
            reason: "disk full".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("4512"));
        assert!(msg.contains("WAS CREATED"));
        assert_eq!(err.stage(), SettlementStage::LinkagePersisting);
        assert_eq!(err.external_order_number(), Some("4512"));
    }

    #[test]
    fn test_invalid_state_lists_all_violations() {
        let err = SettlementError::InvalidState {
            proposal_id: "p-1".to_string(),
            violations: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "Proposal p-1 cannot be settled: a; b");
        assert_eq!(err.stage(), SettlementStage::Validating);
        assert_eq!(err.external_order_number(), None);
    }

    #[test]
    fn test_stage_ordering() {
        assert!(SettlementStage::Validating < SettlementStage::ExternalOrderCreating);
        assert!(SettlementStage::LedgerRecording < SettlementStage::InstallmentsGenerating);
        assert_eq!(SettlementStage::LinkagePersisting.to_string(), "linkage_persisting");
    }

    #[test]
    fn test_fatal_for_batch() {
        assert!(GatewayError::Auth("x".to_string()).is_fatal_for_batch());
        assert!(GatewayError::RateLimitExceeded { attempts: 5 }.is_fatal_for_batch());
        assert!(!GatewayError::ExternalApi {
            status: 500,
            body: String::new()
        }
        .is_fatal_for_batch());
    }
}
