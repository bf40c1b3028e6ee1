use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::request::{RequestKind, RequestState, WorkflowRequest};
use crate::errors::NotifyError;

/// Workflow transitions that fan out to the notification collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    Submitted,
    Reminder,
    Approved,
    Rejected,
    Escalated,
    TimedOut,
    Cancelled,
}

impl WorkflowEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Reminder => "reminder",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Serializable view of a request at the moment an event fired. Templates
/// render from this, never from live records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub id: String,
    pub name: String,
    pub kind: RequestKind,
    pub requester_id: String,
    pub department: Option<String>,
    pub category: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub state: RequestState,
    pub current_level: Option<u32>,
    pub deadline: Option<DateTime<Utc>>,
}

impl RequestSnapshot {
    pub fn of(request: &WorkflowRequest) -> Self {
        Self {
            id: request.id.0.clone(),
            name: request.name.clone(),
            kind: request.kind.clone(),
            requester_id: request.requester_id.clone(),
            department: request.department.clone(),
            category: request.category.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            state: request.state,
            current_level: request.current_level,
            deadline: request.deadline,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub event: WorkflowEvent,
    pub snapshot: RequestSnapshot,
    pub recipients: Vec<String>,
}

impl Dispatch {
    pub fn new(
        event: WorkflowEvent,
        request: &WorkflowRequest,
        recipients: Vec<String>,
    ) -> Self {
        Self { event, snapshot: RequestSnapshot::of(request), recipients }
    }
}

/// Outbound collaborator. Delivery is at-most-once: the engine's state
/// transition has already committed by the time this runs, and a failed
/// delivery is logged by the caller, not retried.
pub trait Notifier: Send + Sync {
    fn deliver(&self, dispatch: &Dispatch) -> Result<(), NotifyError>;
}

/// Captures dispatches for assertions in tests.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    delivered: Mutex<Vec<Dispatch>>,
}

impl InMemoryNotifier {
    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.delivered.lock().map(|guard| guard.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.dispatches().into_iter().map(|dispatch| dispatch.event).collect()
    }
}

impl Notifier for InMemoryNotifier {
    fn deliver(&self, dispatch: &Dispatch) -> Result<(), NotifyError> {
        self.delivered
            .lock()
            .map_err(|_| NotifyError("dispatch buffer poisoned".to_string()))?
            .push(dispatch.clone());
        Ok(())
    }
}
