use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::matrix::{MatrixId, MatrixSelection};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Draft,
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Escalated,
    Timeout,
}

impl RequestState {
    /// Approved, rejected and cancelled admit no further transition.
    /// Escalated and timeout park the request for manual re-routing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }

    pub fn accepts_cancel(&self) -> bool {
        matches!(self, Self::Draft | Self::Pending | Self::Escalated | Self::Timeout)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Purchase,
    Expense,
    Leave,
    Travel,
    Contract,
    Budget,
    Overbudget,
    Custom,
}

/// Pointer back to the business document that owns the approval process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub model: String,
    pub record_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub id: RequestId,
    pub name: String,
    pub kind: RequestKind,
    pub requester_id: String,
    pub department: Option<String>,
    pub category: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub custom_data: Option<Value>,
    pub matrix_id: Option<MatrixId>,
    pub current_level: Option<u32>,
    pub state: RequestState,
    /// Request-level deadline override in hours; 0 defers to the level.
    pub timeout_hours: u32,
    pub deadline: Option<DateTime<Utc>>,
    pub source: Option<DocumentRef>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl WorkflowRequest {
    pub fn new(
        id: RequestId,
        name: impl Into<String>,
        kind: RequestKind,
        requester_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            requester_id: requester_id.into(),
            department: None,
            category: None,
            amount,
            currency: currency.into(),
            custom_data: None,
            matrix_id: None,
            current_level: None,
            state: RequestState::Draft,
            timeout_hours: 0,
            deadline: None,
            source: None,
            created_at,
            submitted_at: None,
            closed_at: None,
        }
    }

    pub fn selection(&self) -> MatrixSelection {
        MatrixSelection {
            amount: self.amount,
            department: self.department.clone(),
            category: self.category.clone(),
            custom_data: self.custom_data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RequestState;

    #[test]
    fn terminal_states_are_exactly_approved_rejected_cancelled() {
        assert!(RequestState::Approved.is_terminal());
        assert!(RequestState::Rejected.is_terminal());
        assert!(RequestState::Cancelled.is_terminal());
        assert!(!RequestState::Pending.is_terminal());
        assert!(!RequestState::Escalated.is_terminal());
        assert!(!RequestState::Timeout.is_terminal());
    }

    #[test]
    fn cancel_is_allowed_from_parked_states() {
        assert!(RequestState::Draft.accepts_cancel());
        assert!(RequestState::Pending.accepts_cancel());
        assert!(RequestState::Escalated.accepts_cancel());
        assert!(RequestState::Timeout.accepts_cancel());
        assert!(!RequestState::Approved.accepts_cancel());
        assert!(!RequestState::Rejected.accepts_cancel());
    }
}
