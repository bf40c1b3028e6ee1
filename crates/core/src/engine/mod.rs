pub mod delegation;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::approval::{Approval, ApprovalId, ApprovalState};
use crate::domain::approver::{ApproverDirectory, ApproverId};
use crate::domain::matrix::{Level, Matrix};
use crate::domain::request::{RequestState, WorkflowRequest};
use crate::engine::delegation::{staff_level, StaffedSlot};
use crate::errors::WorkflowError;
use crate::notifications::{Dispatch, WorkflowEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// Where the request ended up relative to its level ladder after an
/// operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelProgress {
    /// Current level is still collecting decisions.
    Stay,
    /// Moved to the level with this sequence; fresh approvals were created.
    Advanced(u32),
    /// Every level satisfied; the request is approved.
    Finalized,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmitOutcome {
    pub request: WorkflowRequest,
    pub approvals: Vec<Approval>,
    pub dispatches: Vec<Dispatch>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecideOutcome {
    pub request: WorkflowRequest,
    /// The slot the actor just decided, with its new state.
    pub decided: Approval,
    /// Slots created for the next level when the decision advanced it.
    pub new_approvals: Vec<Approval>,
    pub progress: LevelProgress,
    pub dispatches: Vec<Dispatch>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CancelOutcome {
    pub request: WorkflowRequest,
    /// Previously pending slots, now cancelled.
    pub cancelled: Vec<Approval>,
    pub dispatches: Vec<Dispatch>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EscalateOutcome {
    pub request: WorkflowRequest,
    pub dispatches: Vec<Dispatch>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimeoutOutcome {
    pub request: WorkflowRequest,
    /// Pending slots at the expired level, marked timed out.
    pub expired: Vec<Approval>,
    /// Slots created for the next level when the level auto-approved.
    pub new_approvals: Vec<Approval>,
    pub progress: LevelProgress,
    pub dispatches: Vec<Dispatch>,
}

/// The multi-level approval state machine.
///
/// Every operation is a pure function over a snapshot of the request, its
/// approvals and the governing matrix: it validates the transition, returns
/// the rows to write and the notifications to dispatch, and leaves
/// persistence and atomicity to the calling service.
#[derive(Clone, Debug, Default)]
pub struct WorkflowEngine {
    directory: ApproverDirectory,
}

impl WorkflowEngine {
    pub fn new(directory: ApproverDirectory) -> Self {
        Self { directory }
    }

    /// Draft → pending. Requires a resolved matrix; snapshots its first level,
    /// computes the deadline and creates one pending approval per staffed
    /// approver.
    pub fn submit(
        &self,
        request: &WorkflowRequest,
        matrix: Option<&Matrix>,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, WorkflowError> {
        if request.state != RequestState::Draft {
            return Err(WorkflowError::InvalidState { action: "submit", state: request.state });
        }
        let matrix = matrix.ok_or(WorkflowError::NoApplicableRule)?;
        matrix.validate()?;

        let level = matrix.first_level().ok_or_else(|| {
            WorkflowError::InvalidMatrix(
                crate::domain::matrix::MatrixValidationError::NoLevels(matrix.id.0.clone()),
            )
        })?;

        let mut updated = request.clone();
        updated.state = RequestState::Pending;
        updated.matrix_id = Some(matrix.id.clone());
        updated.current_level = Some(level.sequence);
        updated.deadline = deadline_for(request, level, now);
        updated.submitted_at = Some(now);

        let approvals = self.create_level_approvals(&updated, level, now)?;
        let recipients = deciders(&approvals);
        let dispatches = vec![Dispatch::new(WorkflowEvent::Submitted, &updated, recipients)];

        Ok(SubmitOutcome { request: updated, approvals, dispatches })
    }

    /// Record one approver's decision at the current level and evaluate the
    /// level-completion policy. A rejection is absorbing for the whole
    /// request; an approval either advances the ladder or leaves the request
    /// pending with a reminder to the stragglers.
    pub fn decide(
        &self,
        request: &WorkflowRequest,
        matrix: &Matrix,
        approvals: &[Approval],
        actor: &ApproverId,
        decision: Decision,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DecideOutcome, WorkflowError> {
        if request.state != RequestState::Pending {
            return Err(WorkflowError::InvalidState { action: "decide", state: request.state });
        }
        let current = request
            .current_level
            .ok_or(WorkflowError::InvalidState { action: "decide", state: request.state })?;

        let slot = approvals
            .iter()
            .find(|approval| {
                approval.level_sequence == current
                    && approval.is_pending()
                    && approval.is_for(actor)
            })
            .ok_or_else(|| WorkflowError::UnauthorizedApprover { user: actor.0.clone() })?;

        let mut decided = slot.clone();
        decided.decided_at = Some(now);
        decided.comment = comment;

        match decision {
            Decision::Reject => {
                decided.state = ApprovalState::Rejected;
                let mut updated = request.clone();
                updated.state = RequestState::Rejected;
                updated.closed_at = Some(now);
                let dispatches = vec![Dispatch::new(
                    WorkflowEvent::Rejected,
                    &updated,
                    vec![updated.requester_id.clone()],
                )];
                Ok(DecideOutcome {
                    request: updated,
                    decided,
                    new_approvals: Vec::new(),
                    progress: LevelProgress::Stay,
                    dispatches,
                })
            }
            Decision::Approve => {
                decided.state = ApprovalState::Approved;

                let level = matrix.level(current).ok_or_else(|| WorkflowError::UnknownLevel {
                    matrix: matrix.id.0.clone(),
                    sequence: current,
                })?;

                let level_slots: Vec<&Approval> = approvals
                    .iter()
                    .filter(|approval| approval.level_sequence == current)
                    .collect();
                let total = level_slots.len();
                let approved = level_slots
                    .iter()
                    .filter(|approval| {
                        approval.id == decided.id || approval.state == ApprovalState::Approved
                    })
                    .count();

                if level.is_satisfied(approved, total) {
                    let advance = self.advance_from(request, matrix, current, now)?;
                    Ok(DecideOutcome {
                        request: advance.request,
                        decided,
                        new_approvals: advance.new_approvals,
                        progress: advance.progress,
                        dispatches: advance.dispatches,
                    })
                } else {
                    let updated = request.clone();
                    let stragglers: Vec<String> = level_slots
                        .iter()
                        .copied()
                        .filter(|approval| approval.is_pending() && approval.id != decided.id)
                        .map(decider_of)
                        .collect();
                    let dispatches = if stragglers.is_empty() {
                        Vec::new()
                    } else {
                        vec![Dispatch::new(WorkflowEvent::Reminder, &updated, stragglers)]
                    };
                    Ok(DecideOutcome {
                        request: updated,
                        decided,
                        new_approvals: Vec::new(),
                        progress: LevelProgress::Stay,
                        dispatches,
                    })
                }
            }
        }
    }

    /// Allowed from draft, pending, escalated and timeout; terminal requests
    /// stay terminal.
    pub fn cancel(
        &self,
        request: &WorkflowRequest,
        approvals: &[Approval],
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, WorkflowError> {
        if !request.state.accepts_cancel() {
            return Err(WorkflowError::InvalidState { action: "cancel", state: request.state });
        }

        let mut updated = request.clone();
        updated.state = RequestState::Cancelled;
        updated.closed_at = Some(now);

        let cancelled: Vec<Approval> = approvals
            .iter()
            .filter(|approval| approval.is_pending())
            .map(|approval| {
                let mut slot = approval.clone();
                slot.state = ApprovalState::Cancelled;
                slot.decided_at = Some(now);
                slot
            })
            .collect();

        let dispatches = vec![Dispatch::new(
            WorkflowEvent::Cancelled,
            &updated,
            vec![updated.requester_id.clone()],
        )];

        Ok(CancelOutcome { request: updated, cancelled, dispatches })
    }

    /// Park a pending request for manual review by the level's escalation
    /// users. There is no automatic recovery from this state.
    pub fn escalate(
        &self,
        request: &WorkflowRequest,
        matrix: &Matrix,
        _now: DateTime<Utc>,
    ) -> Result<EscalateOutcome, WorkflowError> {
        if request.state != RequestState::Pending {
            return Err(WorkflowError::InvalidState { action: "escalate", state: request.state });
        }
        let current = request
            .current_level
            .ok_or(WorkflowError::InvalidState { action: "escalate", state: request.state })?;
        let level = matrix.level(current).ok_or_else(|| WorkflowError::UnknownLevel {
            matrix: matrix.id.0.clone(),
            sequence: current,
        })?;
        if level.escalation_user_ids.is_empty() {
            return Err(WorkflowError::EscalationNotConfigured { sequence: current });
        }

        let mut updated = request.clone();
        updated.state = RequestState::Escalated;

        let recipients =
            level.escalation_user_ids.iter().map(|id| id.0.clone()).collect::<Vec<_>>();
        let dispatches = vec![Dispatch::new(WorkflowEvent::Escalated, &updated, recipients)];

        Ok(EscalateOutcome { request: updated, dispatches })
    }

    /// Handle one pending request whose deadline has passed: auto-approve the
    /// level if it is configured to, otherwise park the request in timeout.
    pub fn expire(
        &self,
        request: &WorkflowRequest,
        matrix: &Matrix,
        approvals: &[Approval],
        now: DateTime<Utc>,
    ) -> Result<TimeoutOutcome, WorkflowError> {
        if request.state != RequestState::Pending {
            return Err(WorkflowError::InvalidState { action: "expire", state: request.state });
        }
        let deadline_passed = request.deadline.is_some_and(|deadline| deadline <= now);
        if !deadline_passed {
            return Err(WorkflowError::InvalidState { action: "expire", state: request.state });
        }
        let current = request
            .current_level
            .ok_or(WorkflowError::InvalidState { action: "expire", state: request.state })?;
        let level = matrix.level(current).ok_or_else(|| WorkflowError::UnknownLevel {
            matrix: matrix.id.0.clone(),
            sequence: current,
        })?;

        let mark = |state: ApprovalState| -> Vec<Approval> {
            approvals
                .iter()
                .filter(|approval| approval.level_sequence == current && approval.is_pending())
                .map(|approval| {
                    let mut slot = approval.clone();
                    slot.state = state;
                    slot.decided_at = Some(now);
                    slot
                })
                .collect()
        };

        if level.auto_approve_on_timeout {
            let expired = mark(ApprovalState::Timeout);
            let advance = self.advance_from(request, matrix, current, now)?;
            Ok(TimeoutOutcome {
                request: advance.request,
                expired,
                new_approvals: advance.new_approvals,
                progress: advance.progress,
                dispatches: advance.dispatches,
            })
        } else {
            let expired = mark(ApprovalState::Timeout);
            let mut updated = request.clone();
            updated.state = RequestState::Timeout;
            let dispatches = vec![Dispatch::new(
                WorkflowEvent::TimedOut,
                &updated,
                vec![updated.requester_id.clone()],
            )];
            Ok(TimeoutOutcome {
                request: updated,
                expired,
                new_approvals: Vec::new(),
                progress: LevelProgress::Stay,
                dispatches,
            })
        }
    }

    fn advance_from(
        &self,
        request: &WorkflowRequest,
        matrix: &Matrix,
        current: u32,
        now: DateTime<Utc>,
    ) -> Result<Advance, WorkflowError> {
        let mut updated = request.clone();

        match matrix.next_level(current) {
            Some(next) => {
                updated.current_level = Some(next.sequence);
                updated.deadline = deadline_for(request, next, now);
                let new_approvals = self.create_level_approvals(&updated, next, now)?;
                let recipients = deciders(&new_approvals);
                let dispatches =
                    vec![Dispatch::new(WorkflowEvent::Submitted, &updated, recipients)];
                Ok(Advance {
                    request: updated,
                    new_approvals,
                    progress: LevelProgress::Advanced(next.sequence),
                    dispatches,
                })
            }
            None => {
                updated.state = RequestState::Approved;
                updated.current_level = None;
                updated.deadline = None;
                updated.closed_at = Some(now);
                let dispatches = vec![Dispatch::new(
                    WorkflowEvent::Approved,
                    &updated,
                    vec![updated.requester_id.clone()],
                )];
                Ok(Advance {
                    request: updated,
                    new_approvals: Vec::new(),
                    progress: LevelProgress::Finalized,
                    dispatches,
                })
            }
        }
    }

    fn create_level_approvals(
        &self,
        request: &WorkflowRequest,
        level: &Level,
        now: DateTime<Utc>,
    ) -> Result<Vec<Approval>, WorkflowError> {
        let slots = staff_level(&self.directory, level, request.amount, now);
        if slots.is_empty() {
            return Err(WorkflowError::LevelUnstaffed { sequence: level.sequence });
        }

        Ok(slots
            .into_iter()
            .map(|StaffedSlot { approver, delegate }| Approval {
                id: ApprovalId(Uuid::new_v4().to_string()),
                request_id: request.id.clone(),
                level_sequence: level.sequence,
                approver_id: approver,
                delegate_id: delegate,
                state: ApprovalState::Pending,
                comment: None,
                deadline: request.deadline,
                created_at: now,
                decided_at: None,
            })
            .collect())
    }
}

struct Advance {
    request: WorkflowRequest,
    new_approvals: Vec<Approval>,
    progress: LevelProgress,
    dispatches: Vec<Dispatch>,
}

/// Request-level timeout wins over the level's; zero on both means no
/// deadline.
fn deadline_for(
    request: &WorkflowRequest,
    level: &Level,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if request.timeout_hours > 0 {
        Some(now + Duration::hours(i64::from(request.timeout_hours)))
    } else if level.timeout_hours > 0 {
        Some(now + Duration::hours(i64::from(level.timeout_hours)))
    } else {
        None
    }
}

fn decider_of(approval: &Approval) -> String {
    approval.delegate_id.as_ref().unwrap_or(&approval.approver_id).0.clone()
}

fn deciders(approvals: &[Approval]) -> Vec<String> {
    approvals.iter().map(decider_of).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{Decision, LevelProgress, WorkflowEngine};
    use crate::domain::approval::{Approval, ApprovalState};
    use crate::domain::approver::{Approver, ApproverDirectory, ApproverId, ApproverStatus};
    use crate::domain::matrix::{
        AmountRange, CompletionPolicy, Level, Matrix, MatrixCriteria, MatrixId, MatrixState,
    };
    use crate::domain::request::{RequestId, RequestKind, RequestState, WorkflowRequest};
    use crate::errors::WorkflowError;
    use crate::notifications::WorkflowEvent;

    fn approver(id: &str) -> Approver {
        Approver {
            id: ApproverId(id.to_string()),
            name: id.to_string(),
            groups: Vec::new(),
            max_approval_amount: None,
            window: None,
            status: ApproverStatus::Available,
            auto_delegate: false,
            delegate_to: None,
            backups: Vec::new(),
        }
    }

    fn level(sequence: u32, policy: CompletionPolicy, ids: &[&str]) -> Level {
        Level {
            sequence,
            name: format!("L{sequence}"),
            approver_ids: ids.iter().map(|id| ApproverId(id.to_string())).collect(),
            approver_groups: Vec::new(),
            policy,
            required_approvals: 1,
            approval_percentage: Decimal::from(100u32),
            timeout_hours: 0,
            auto_approve_on_timeout: false,
            escalation_user_ids: Vec::new(),
        }
    }

    /// L1: any of {A, B}; L2: all of {C, D}.
    fn two_level_matrix() -> Matrix {
        Matrix {
            id: MatrixId("mx-1".to_string()),
            name: "High value purchases".to_string(),
            sequence: 10,
            state: MatrixState::Active,
            criteria: MatrixCriteria::Amount(AmountRange { min: Decimal::ZERO, max: None }),
            levels: vec![
                level(1, CompletionPolicy::Any, &["u-a", "u-b"]),
                level(2, CompletionPolicy::All, &["u-c", "u-d"]),
            ],
        }
    }

    fn engine() -> WorkflowEngine {
        WorkflowEngine::new(ApproverDirectory::new(vec![
            approver("u-a"),
            approver("u-b"),
            approver("u-c"),
            approver("u-d"),
        ]))
    }

    fn draft_request() -> WorkflowRequest {
        WorkflowRequest::new(
            RequestId("req-1".to_string()),
            "Data center hardware",
            RequestKind::Purchase,
            "u-requester",
            Decimal::new(5_000_000, 0),
            "USD",
            now(),
        )
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap()
    }

    fn decide_approve(
        engine: &WorkflowEngine,
        request: &WorkflowRequest,
        matrix: &Matrix,
        approvals: &[Approval],
        user: &str,
    ) -> super::DecideOutcome {
        engine
            .decide(
                request,
                matrix,
                approvals,
                &ApproverId(user.to_string()),
                Decision::Approve,
                None,
                now(),
            )
            .expect("decision should apply")
    }

    #[test]
    fn submit_without_matrix_fails_with_no_applicable_rule() {
        let error = engine().submit(&draft_request(), None, now()).expect_err("must fail");
        assert_eq!(error, WorkflowError::NoApplicableRule);
    }

    #[test]
    fn submit_moves_to_pending_and_staffs_first_level() {
        let matrix = two_level_matrix();
        let outcome =
            engine().submit(&draft_request(), Some(&matrix), now()).expect("submit succeeds");

        assert_eq!(outcome.request.state, RequestState::Pending);
        assert_eq!(outcome.request.current_level, Some(1));
        assert_eq!(outcome.request.matrix_id.as_ref().map(|id| id.0.as_str()), Some("mx-1"));
        assert_eq!(outcome.approvals.len(), 2);
        assert!(outcome.approvals.iter().all(|approval| approval.level_sequence == 1));
        assert_eq!(outcome.dispatches.len(), 1);
        assert_eq!(outcome.dispatches[0].event, WorkflowEvent::Submitted);
    }

    #[test]
    fn submit_twice_is_an_invalid_state() {
        let matrix = two_level_matrix();
        let subject = engine();
        let submitted = subject.submit(&draft_request(), Some(&matrix), now()).expect("submit");

        let error =
            subject.submit(&submitted.request, Some(&matrix), now()).expect_err("must fail");
        assert!(matches!(error, WorkflowError::InvalidState { action: "submit", .. }));
    }

    #[test]
    fn any_level_completes_on_first_approval_then_all_level_requires_both() {
        let matrix = two_level_matrix();
        let subject = engine();
        let submitted = subject.submit(&draft_request(), Some(&matrix), now()).expect("submit");

        // A approves L1: any-policy completes, ladder advances to L2.
        let first = decide_approve(&subject, &submitted.request, &matrix, &submitted.approvals, "u-a");
        assert_eq!(first.progress, LevelProgress::Advanced(2));
        assert_eq!(first.request.current_level, Some(2));
        assert_eq!(first.request.state, RequestState::Pending);
        assert_eq!(first.new_approvals.len(), 2);

        // C approves L2: all-policy still waiting on D.
        let second =
            decide_approve(&subject, &first.request, &matrix, &first.new_approvals, "u-c");
        assert_eq!(second.progress, LevelProgress::Stay);
        assert_eq!(second.request.state, RequestState::Pending);
        assert_eq!(second.dispatches[0].event, WorkflowEvent::Reminder);
        assert_eq!(second.dispatches[0].recipients, vec!["u-d".to_string()]);

        // D approves L2: Nth approval completes the level and the request.
        let mut current_approvals = first.new_approvals.clone();
        for approval in &mut current_approvals {
            if approval.id == second.decided.id {
                *approval = second.decided.clone();
            }
        }
        let third =
            decide_approve(&subject, &second.request, &matrix, &current_approvals, "u-d");
        assert_eq!(third.progress, LevelProgress::Finalized);
        assert_eq!(third.request.state, RequestState::Approved);
        assert_eq!(third.request.current_level, None);
        assert_eq!(third.dispatches[0].event, WorkflowEvent::Approved);
    }

    #[test]
    fn rejection_at_first_level_is_absorbing() {
        let matrix = two_level_matrix();
        let subject = engine();
        let submitted = subject.submit(&draft_request(), Some(&matrix), now()).expect("submit");

        let outcome = subject
            .decide(
                &submitted.request,
                &matrix,
                &submitted.approvals,
                &ApproverId("u-b".to_string()),
                Decision::Reject,
                Some("Budget freeze".to_string()),
                now(),
            )
            .expect("reject applies");

        assert_eq!(outcome.request.state, RequestState::Rejected);
        assert_eq!(outcome.decided.state, ApprovalState::Rejected);
        assert!(outcome.new_approvals.is_empty());
        assert_eq!(outcome.dispatches[0].event, WorkflowEvent::Rejected);

        // The request is terminal: A's still-pending slot can no longer act.
        let error = subject
            .decide(
                &outcome.request,
                &matrix,
                &submitted.approvals,
                &ApproverId("u-a".to_string()),
                Decision::Approve,
                None,
                now(),
            )
            .expect_err("terminal request rejects decisions");
        assert!(matches!(error, WorkflowError::InvalidState { action: "decide", .. }));
    }

    #[test]
    fn deciding_twice_on_the_same_slot_is_unauthorized() {
        let matrix = Matrix {
            levels: vec![level(1, CompletionPolicy::All, &["u-a", "u-b"])],
            ..two_level_matrix()
        };
        let subject = engine();
        let submitted = subject.submit(&draft_request(), Some(&matrix), now()).expect("submit");

        let first = decide_approve(&subject, &submitted.request, &matrix, &submitted.approvals, "u-a");
        assert_eq!(first.progress, LevelProgress::Stay);

        let mut current = submitted.approvals.clone();
        for approval in &mut current {
            if approval.id == first.decided.id {
                *approval = first.decided.clone();
            }
        }

        let error = subject
            .decide(
                &first.request,
                &matrix,
                &current,
                &ApproverId("u-a".to_string()),
                Decision::Approve,
                None,
                now(),
            )
            .expect_err("second decision must not double-apply");
        assert_eq!(error, WorkflowError::UnauthorizedApprover { user: "u-a".to_string() });
    }

    #[test]
    fn outsider_decision_is_unauthorized() {
        let matrix = two_level_matrix();
        let subject = engine();
        let submitted = subject.submit(&draft_request(), Some(&matrix), now()).expect("submit");

        // u-c sits at level 2, not the current level.
        let error = subject
            .decide(
                &submitted.request,
                &matrix,
                &submitted.approvals,
                &ApproverId("u-c".to_string()),
                Decision::Approve,
                None,
                now(),
            )
            .expect_err("wrong-level approver");
        assert_eq!(error, WorkflowError::UnauthorizedApprover { user: "u-c".to_string() });
    }

    #[test]
    fn delegate_may_decide_the_delegated_slot() {
        let mut offline = approver("u-a");
        offline.status = ApproverStatus::Offline;
        offline.auto_delegate = true;
        offline.delegate_to = Some(ApproverId("u-b".to_string()));
        let subject = WorkflowEngine::new(ApproverDirectory::new(vec![offline, approver("u-b")]));

        let matrix = Matrix {
            levels: vec![level(1, CompletionPolicy::Any, &["u-a"])],
            ..two_level_matrix()
        };
        let submitted = subject.submit(&draft_request(), Some(&matrix), now()).expect("submit");
        assert_eq!(
            submitted.approvals[0].delegate_id.as_ref().map(|id| id.0.as_str()),
            Some("u-b")
        );

        let outcome = decide_approve(&subject, &submitted.request, &matrix, &submitted.approvals, "u-b");
        assert_eq!(outcome.request.state, RequestState::Approved);
        // The slot still belongs to the original approver.
        assert_eq!(outcome.decided.approver_id.0, "u-a");
    }

    #[test]
    fn cancel_from_pending_cancels_open_slots() {
        let matrix = two_level_matrix();
        let subject = engine();
        let submitted = subject.submit(&draft_request(), Some(&matrix), now()).expect("submit");

        let outcome =
            subject.cancel(&submitted.request, &submitted.approvals, now()).expect("cancel");
        assert_eq!(outcome.request.state, RequestState::Cancelled);
        assert_eq!(outcome.cancelled.len(), 2);
        assert!(outcome.cancelled.iter().all(|slot| slot.state == ApprovalState::Cancelled));

        let error =
            subject.cancel(&outcome.request, &outcome.cancelled, now()).expect_err("terminal");
        assert!(matches!(error, WorkflowError::InvalidState { action: "cancel", .. }));
    }

    #[test]
    fn request_timeout_override_beats_level_timeout() {
        let mut matrix = two_level_matrix();
        matrix.levels[0].timeout_hours = 48;
        let mut request = draft_request();
        request.timeout_hours = 24;

        let outcome = engine().submit(&request, Some(&matrix), now()).expect("submit");
        assert_eq!(outcome.request.deadline, Some(now() + chrono::Duration::hours(24)));
    }

    #[test]
    fn expired_level_without_auto_approve_parks_in_timeout() {
        let mut matrix = two_level_matrix();
        matrix.levels[0].timeout_hours = 24;
        let subject = engine();
        let submitted = subject.submit(&draft_request(), Some(&matrix), now()).expect("submit");

        let later = now() + chrono::Duration::hours(25);
        let outcome = subject
            .expire(&submitted.request, &matrix, &submitted.approvals, later)
            .expect("expire");

        assert_eq!(outcome.request.state, RequestState::Timeout);
        assert_eq!(outcome.expired.len(), 2);
        assert!(outcome.expired.iter().all(|slot| slot.state == ApprovalState::Timeout));
        assert_eq!(outcome.dispatches[0].event, WorkflowEvent::TimedOut);
    }

    #[test]
    fn expired_auto_approve_level_advances_the_ladder() {
        let mut matrix = two_level_matrix();
        matrix.levels[0].timeout_hours = 24;
        matrix.levels[0].auto_approve_on_timeout = true;
        let subject = engine();
        let submitted = subject.submit(&draft_request(), Some(&matrix), now()).expect("submit");

        let later = now() + chrono::Duration::hours(25);
        let outcome = subject
            .expire(&submitted.request, &matrix, &submitted.approvals, later)
            .expect("expire");

        assert_eq!(outcome.progress, LevelProgress::Advanced(2));
        assert_eq!(outcome.request.state, RequestState::Pending);
        assert_eq!(outcome.request.current_level, Some(2));
        assert_eq!(outcome.new_approvals.len(), 2);
    }

    #[test]
    fn expire_before_deadline_is_rejected() {
        let mut matrix = two_level_matrix();
        matrix.levels[0].timeout_hours = 24;
        let subject = engine();
        let submitted = subject.submit(&draft_request(), Some(&matrix), now()).expect("submit");

        let error = subject
            .expire(&submitted.request, &matrix, &submitted.approvals, now())
            .expect_err("deadline not reached");
        assert!(matches!(error, WorkflowError::InvalidState { action: "expire", .. }));
    }

    #[test]
    fn escalate_requires_configured_users() {
        let mut matrix = two_level_matrix();
        let subject = engine();
        let submitted = subject.submit(&draft_request(), Some(&matrix), now()).expect("submit");

        let error = subject
            .escalate(&submitted.request, &matrix, now())
            .expect_err("no escalation users configured");
        assert_eq!(error, WorkflowError::EscalationNotConfigured { sequence: 1 });

        matrix.levels[0].escalation_user_ids = vec![ApproverId("u-director".to_string())];
        let outcome = subject.escalate(&submitted.request, &matrix, now()).expect("escalate");
        assert_eq!(outcome.request.state, RequestState::Escalated);
        assert_eq!(outcome.dispatches[0].recipients, vec!["u-director".to_string()]);
    }

    #[test]
    fn unstaffable_level_fails_submit() {
        let matrix = Matrix {
            levels: vec![level(1, CompletionPolicy::Any, &["u-nobody"])],
            ..two_level_matrix()
        };

        let error = engine().submit(&draft_request(), Some(&matrix), now()).expect_err("fails");
        assert_eq!(error, WorkflowError::LevelUnstaffed { sequence: 1 });
    }
}
