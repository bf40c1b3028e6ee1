use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approver::ApproverId;
use crate::domain::request::RequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Timeout,
}

/// One approver's decision slot within a level of a request. When the slot was
/// delegated, `approver_id` keeps the originally assigned approver and
/// `delegate_id` names the substitute who may act in their place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub request_id: RequestId,
    pub level_sequence: u32,
    pub approver_id: ApproverId,
    pub delegate_id: Option<ApproverId>,
    pub state: ApprovalState,
    pub comment: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Approval {
    /// Whether `user` may decide this slot: either the assigned approver or,
    /// when delegated, the delegate.
    pub fn is_for(&self, user: &ApproverId) -> bool {
        self.approver_id == *user || self.delegate_id.as_ref() == Some(user)
    }

    pub fn is_pending(&self) -> bool {
        self.state == ApprovalState::Pending
    }
}
