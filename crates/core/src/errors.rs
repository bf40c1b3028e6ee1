use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::budget::CommitmentState;
use crate::domain::matrix::MatrixValidationError;
use crate::domain::request::RequestState;

/// Failures surfaced by workflow transitions. All are synchronous and local;
/// none are retried internally.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum WorkflowError {
    #[error("no active approval matrix matches the request")]
    NoApplicableRule,
    #[error("no pending approval for user `{user}` at the current level")]
    UnauthorizedApprover { user: String },
    #[error("`{action}` is not allowed while the request is {state:?}")]
    InvalidState { action: &'static str, state: RequestState },
    #[error("level {sequence} has no escalation users configured")]
    EscalationNotConfigured { sequence: u32 },
    #[error("level {sequence} resolved to an empty approver set")]
    LevelUnstaffed { sequence: u32 },
    #[error("matrix `{matrix}` does not define level {sequence}")]
    UnknownLevel { matrix: String, sequence: u32 },
    #[error(transparent)]
    InvalidMatrix(#[from] MatrixValidationError),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum BudgetError {
    #[error("insufficient budget: requested {requested}, available {available}")]
    InsufficientBudget { requested: Decimal, available: Decimal },
    #[error("budget `{0}` is not active")]
    BudgetInactive(String),
    #[error("cannot {action} a {state:?} commitment")]
    InvalidCommitmentState { action: &'static str, state: CommitmentState },
    #[error("no commitment with id `{0}`")]
    UnknownCommitment(String),
    #[error("commitment amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
}

/// Notification delivery failure. Deliveries are fire-and-forget; callers log
/// these and never roll back the triggering state transition.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);
