pub mod budget;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod notifications;
pub mod routing;

pub use budget::{BudgetCheck, BudgetDecision, BudgetLedger, BudgetedDocument};
pub use domain::approval::{Approval, ApprovalId, ApprovalState};
pub use domain::approver::{
    Approver, ApproverDirectory, ApproverId, ApproverStatus, AvailabilityWindow, AvailableDays,
};
pub use domain::budget::{
    AlertSeverity, AlertThreshold, Budget, BudgetAlert, BudgetId, BudgetScope, BudgetState,
    Commitment, CommitmentId, CommitmentState,
};
pub use domain::matrix::{
    AmountRange, CompletionPolicy, CustomRule, Level, Matrix, MatrixCriteria, MatrixId,
    MatrixSelection, MatrixState, MatrixValidationError, RuleOp,
};
pub use domain::request::{DocumentRef, RequestId, RequestKind, RequestState, WorkflowRequest};
pub use engine::{
    CancelOutcome, DecideOutcome, Decision, EscalateOutcome, LevelProgress, SubmitOutcome,
    TimeoutOutcome, WorkflowEngine,
};
pub use errors::{BudgetError, NotifyError, WorkflowError};
pub use notifications::{Dispatch, InMemoryNotifier, Notifier, RequestSnapshot, WorkflowEvent};
pub use routing::MatrixResolver;

pub use chrono;
pub use rust_decimal;
