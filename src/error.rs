//! Error types for budget engine operations
//!
//! Errors are classified by how the caller should react:
//! - Retryable: storage busy/locked, contract-number races
//! - Rejected: validation failures, insufficient budget, constraint violations
//! - Missing: references to phases, contracts or milestones that do not exist

use rust_decimal::Decimal;
use thiserror::Error;

use crate::db::DbError;

/// Error types for budget engine operations
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(
        "Insufficient budget in phase {phase_id}: requested {requested}, available {available} (short by {shortfall})"
    )]
    InsufficientBudget {
        phase_id: String,
        requested: Decimal,
        available: Decimal,
        shortfall: Decimal,
    },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Contract number {0} is already taken")]
    DuplicateContractNumber(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

impl BudgetError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        BudgetError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true if repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BudgetError::DuplicateContractNumber(_) => true,
            BudgetError::Storage(e) => e.is_busy(),
            _ => false,
        }
    }

    /// Machine-readable kind for the calling layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BudgetError::Validation(_) => ErrorKind::Validation,
            BudgetError::InsufficientBudget { .. } => ErrorKind::InsufficientBudget,
            BudgetError::ConstraintViolation(_) | BudgetError::DuplicateContractNumber(_) => {
                ErrorKind::ConstraintViolation
            }
            BudgetError::NotFound { .. } => ErrorKind::NotFound,
            BudgetError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            BudgetError::Validation(_) => "Correct the highlighted input and submit again.",
            BudgetError::InsufficientBudget { .. } => {
                "Reduce the contract amount or raise the phase allocation."
            }
            BudgetError::ConstraintViolation(_) => {
                "Remove the contracts holding budget in this phase first."
            }
            BudgetError::DuplicateContractNumber(_) => "Try again; a new number will be issued.",
            BudgetError::NotFound { .. } => "Refresh the view; the record may have been removed.",
            BudgetError::Storage(_) => {
                "Retry the operation. If it keeps failing, run recalculate_budgets."
            }
        }
    }
}

/// Serializable error representation for the calling UI layer
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetErrorPayload {
    pub message: String,
    pub kind: ErrorKind,
    pub can_retry: bool,
    pub recovery_suggestion: String,
    /// Amount missing from the phase allocation, for `InsufficientBudget` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    InsufficientBudget,
    ConstraintViolation,
    NotFound,
    Storage,
}

impl From<&BudgetError> for BudgetErrorPayload {
    fn from(err: &BudgetError) -> Self {
        let shortfall = match err {
            BudgetError::InsufficientBudget { shortfall, .. } => Some(*shortfall),
            _ => None,
        };

        BudgetErrorPayload {
            message: err.to_string(),
            kind: err.kind(),
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
            shortfall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_budget_payload_carries_shortfall() {
        let err = BudgetError::InsufficientBudget {
            phase_id: "ph-1".to_string(),
            requested: Decimal::from(112_500),
            available: Decimal::from(100_000),
            shortfall: Decimal::from(12_500),
        };
        let payload = BudgetErrorPayload::from(&err);
        assert_eq!(payload.kind, ErrorKind::InsufficientBudget);
        assert_eq!(payload.shortfall, Some(Decimal::from(12_500)));
        assert!(!payload.can_retry);
        assert!(payload.message.contains("short by 12500"));
    }

    #[test]
    fn test_duplicate_number_is_retryable() {
        let err = BudgetError::DuplicateContractNumber("CNT-2026-0001".to_string());
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

        let err = BudgetError::Validation("name is empty".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_payload_serializes_camel_case() {
        let err = BudgetError::not_found("Phase", "ph-404");
        let json = serde_json::to_value(BudgetErrorPayload::from(&err)).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["canRetry"], false);
        assert!(json.get("shortfall").is_none());
        assert_eq!(json["message"], "Phase not found: ph-404");
    }
}
