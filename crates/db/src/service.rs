use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Sqlite;
use thiserror::Error;
use tracing::{debug, warn};

use signoff_core::config::WorkflowConfig;
use signoff_core::domain::approval::Approval;
use signoff_core::domain::approver::{ApproverDirectory, ApproverId};
use signoff_core::domain::matrix::Matrix;
use signoff_core::domain::request::{RequestId, WorkflowRequest};
use signoff_core::engine::{Decision, LevelProgress, WorkflowEngine};
use signoff_core::errors::WorkflowError;
use signoff_core::notifications::{Dispatch, Notifier, WorkflowEvent};
use signoff_core::routing::MatrixResolver;

use crate::repositories::approval::approval_state_as_str;
use crate::repositories::request::request_state_as_str;
use crate::repositories::{
    ApprovalRepository, ApproverRepository, MatrixRepository, RepositoryError,
    RequestRepository, SqlApprovalRepository, SqlApproverRepository, SqlMatrixRepository,
    SqlRequestRepository,
};
use crate::DbPool;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("request `{0}` not found")]
    RequestNotFound(String),
    #[error("matrix `{0}` not found")]
    MatrixNotFound(String),
    #[error("request `{0}` was modified concurrently")]
    Conflict(String),
}

impl From<sqlx::Error> for ServiceError {
    fn from(value: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(value))
    }
}

/// Outcome of one timeout sweep pass. Failures are isolated per request and
/// never abort the batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub advanced: usize,
    pub timed_out: usize,
    pub failed: usize,
}

/// Drives the pure workflow engine against the store.
///
/// Every transition runs in one transaction with an optimistic guard: the
/// request (and, for decisions, the approval slot) is updated only while its
/// state still matches the snapshot the engine evaluated, so two racing calls
/// cannot double-complete a level or resurrect a terminal request.
/// Notifications go out after commit and are fire-and-forget.
pub struct WorkflowService {
    pool: DbPool,
    notifier: Arc<dyn Notifier>,
    config: WorkflowConfig,
}

impl WorkflowService {
    pub fn new(pool: DbPool, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_config(
            pool,
            notifier,
            WorkflowConfig { default_timeout_hours: 0, reminders_enabled: true },
        )
    }

    pub fn with_config(pool: DbPool, notifier: Arc<dyn Notifier>, config: WorkflowConfig) -> Self {
        Self { pool, notifier, config }
    }

    pub async fn submit(
        &self,
        id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<WorkflowRequest, ServiceError> {
        let mut request = self.load_request(id).await?;
        if request.timeout_hours == 0 {
            request.timeout_hours = self.config.default_timeout_hours;
        }

        let matrices = SqlMatrixRepository::new(self.pool.clone()).list_active().await?;
        let resolver = MatrixResolver::new(matrices);
        let matrix = resolver.resolve(&request.selection());

        let engine = self.engine().await?;
        let outcome = engine.submit(&request, matrix, now)?;

        let expected = request_state_as_str(&request.state);
        let mut tx = self.pool.begin().await?;
        if update_request(&mut tx, &outcome.request, expected).await? == 0 {
            tx.rollback().await?;
            return Err(ServiceError::Conflict(id.0.clone()));
        }
        for approval in &outcome.approvals {
            insert_approval(&mut tx, approval).await?;
        }
        tx.commit().await?;

        self.dispatch_all(&outcome.dispatches);
        Ok(outcome.request)
    }

    pub async fn decide(
        &self,
        id: &RequestId,
        actor: &ApproverId,
        decision: Decision,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowRequest, ServiceError> {
        let request = self.load_request(id).await?;
        let matrix = self.load_matrix_of(&request).await?;
        let approvals =
            SqlApprovalRepository::new(self.pool.clone()).find_by_request(id).await?;

        let engine = self.engine().await?;
        let mut outcome =
            engine.decide(&request, &matrix, &approvals, actor, decision, comment, now)?;
        if !self.config.reminders_enabled {
            outcome.dispatches.retain(|dispatch| dispatch.event != WorkflowEvent::Reminder);
        }

        let mut tx = self.pool.begin().await?;
        // Guard the decided slot first: a racing decision on the same slot
        // loses here instead of double-applying.
        if update_approval(&mut tx, &outcome.decided).await? == 0 {
            tx.rollback().await?;
            return Err(ServiceError::Conflict(id.0.clone()));
        }
        if update_request(&mut tx, &outcome.request, "pending").await? == 0 {
            tx.rollback().await?;
            return Err(ServiceError::Conflict(id.0.clone()));
        }
        for approval in &outcome.new_approvals {
            insert_approval(&mut tx, approval).await?;
        }
        tx.commit().await?;

        debug!(
            request_id = %id.0,
            actor = %actor.0,
            progress = ?outcome.progress,
            "decision recorded"
        );
        self.dispatch_all(&outcome.dispatches);
        Ok(outcome.request)
    }

    pub async fn cancel(
        &self,
        id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<WorkflowRequest, ServiceError> {
        let request = self.load_request(id).await?;
        let approvals =
            SqlApprovalRepository::new(self.pool.clone()).find_by_request(id).await?;

        let engine = self.engine().await?;
        let outcome = engine.cancel(&request, &approvals, now)?;

        let expected = request_state_as_str(&request.state);
        let mut tx = self.pool.begin().await?;
        if update_request(&mut tx, &outcome.request, expected).await? == 0 {
            tx.rollback().await?;
            return Err(ServiceError::Conflict(id.0.clone()));
        }
        for approval in &outcome.cancelled {
            update_approval(&mut tx, approval).await?;
        }
        tx.commit().await?;

        self.dispatch_all(&outcome.dispatches);
        Ok(outcome.request)
    }

    pub async fn escalate(
        &self,
        id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<WorkflowRequest, ServiceError> {
        let request = self.load_request(id).await?;
        let matrix = self.load_matrix_of(&request).await?;

        let engine = self.engine().await?;
        let outcome = engine.escalate(&request, &matrix, now)?;

        let mut tx = self.pool.begin().await?;
        if update_request(&mut tx, &outcome.request, "pending").await? == 0 {
            tx.rollback().await?;
            return Err(ServiceError::Conflict(id.0.clone()));
        }
        tx.commit().await?;

        self.dispatch_all(&outcome.dispatches);
        Ok(outcome.request)
    }

    /// Periodic sweep over pending requests whose deadline has passed. One
    /// request failing is logged and skipped; the rest of the batch still
    /// runs.
    pub async fn process_timeouts(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let due = SqlRequestRepository::new(self.pool.clone())
            .list_pending_past_deadline(now)
            .await?;

        let mut report = SweepReport::default();
        for request in due {
            report.processed += 1;
            match self.expire_one(&request, now).await {
                Ok(LevelProgress::Stay) => report.timed_out += 1,
                Ok(_) => report.advanced += 1,
                Err(error) => {
                    report.failed += 1;
                    warn!(request_id = %request.id.0, %error, "timeout sweep item failed");
                }
            }
        }
        Ok(report)
    }

    async fn expire_one(
        &self,
        request: &WorkflowRequest,
        now: DateTime<Utc>,
    ) -> Result<LevelProgress, ServiceError> {
        let matrix = self.load_matrix_of(request).await?;
        let approvals = SqlApprovalRepository::new(self.pool.clone())
            .find_by_request(&request.id)
            .await?;

        let engine = self.engine().await?;
        let outcome = engine.expire(request, &matrix, &approvals, now)?;

        let mut tx = self.pool.begin().await?;
        if update_request(&mut tx, &outcome.request, "pending").await? == 0 {
            tx.rollback().await?;
            return Err(ServiceError::Conflict(request.id.0.clone()));
        }
        for approval in &outcome.expired {
            update_approval(&mut tx, approval).await?;
        }
        for approval in &outcome.new_approvals {
            insert_approval(&mut tx, approval).await?;
        }
        tx.commit().await?;

        self.dispatch_all(&outcome.dispatches);
        Ok(outcome.progress)
    }

    async fn engine(&self) -> Result<WorkflowEngine, ServiceError> {
        let approvers = SqlApproverRepository::new(self.pool.clone()).list_all().await?;
        Ok(WorkflowEngine::new(ApproverDirectory::new(approvers)))
    }

    async fn load_request(&self, id: &RequestId) -> Result<WorkflowRequest, ServiceError> {
        SqlRequestRepository::new(self.pool.clone())
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::RequestNotFound(id.0.clone()))
    }

    async fn load_matrix_of(&self, request: &WorkflowRequest) -> Result<Matrix, ServiceError> {
        let matrix_id = request
            .matrix_id
            .as_ref()
            .ok_or_else(|| ServiceError::MatrixNotFound(format!("<none for {}>", request.id.0)))?;
        SqlMatrixRepository::new(self.pool.clone())
            .find_by_id(matrix_id)
            .await?
            .ok_or_else(|| ServiceError::MatrixNotFound(matrix_id.0.clone()))
    }

    fn dispatch_all(&self, dispatches: &[Dispatch]) {
        for dispatch in dispatches {
            if let Err(error) = self.notifier.deliver(dispatch) {
                warn!(
                    event = dispatch.event.as_str(),
                    request_id = %dispatch.snapshot.id,
                    %error,
                    "notification delivery failed"
                );
            }
        }
    }
}

/// Write the mutable request fields, guarded on the state the engine
/// evaluated. Returns affected row count; 0 means a concurrent writer won.
async fn update_request(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    request: &WorkflowRequest,
    expected_state: &str,
) -> Result<u64, ServiceError> {
    let result = sqlx::query(
        "UPDATE workflow_request
         SET matrix_id = ?, current_level = ?, state = ?, timeout_hours = ?, deadline = ?,
             submitted_at = ?, closed_at = ?
         WHERE id = ? AND state = ?",
    )
    .bind(request.matrix_id.as_ref().map(|id| id.0.as_str()))
    .bind(request.current_level.map(i64::from))
    .bind(request_state_as_str(&request.state))
    .bind(i64::from(request.timeout_hours))
    .bind(request.deadline.map(|value| value.to_rfc3339()))
    .bind(request.submitted_at.map(|value| value.to_rfc3339()))
    .bind(request.closed_at.map(|value| value.to_rfc3339()))
    .bind(&request.id.0)
    .bind(expected_state)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// Write a decided/cancelled/expired slot, guarded on it still being pending.
async fn update_approval(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    approval: &Approval,
) -> Result<u64, ServiceError> {
    let result = sqlx::query(
        "UPDATE workflow_approval
         SET state = ?, comment = ?, decided_at = ?
         WHERE id = ? AND state = 'pending'",
    )
    .bind(approval_state_as_str(&approval.state))
    .bind(&approval.comment)
    .bind(approval.decided_at.map(|value| value.to_rfc3339()))
    .bind(&approval.id.0)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

async fn insert_approval(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    approval: &Approval,
) -> Result<(), ServiceError> {
    sqlx::query(
        "INSERT INTO workflow_approval (id, request_id, level_sequence, approver_id, delegate_id,
                                        state, comment, deadline, created_at, decided_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&approval.id.0)
    .bind(&approval.request_id.0)
    .bind(i64::from(approval.level_sequence))
    .bind(&approval.approver_id.0)
    .bind(approval.delegate_id.as_ref().map(|id| id.0.as_str()))
    .bind(approval_state_as_str(&approval.state))
    .bind(&approval.comment)
    .bind(approval.deadline.map(|value| value.to_rfc3339()))
    .bind(approval.created_at.to_rfc3339())
    .bind(approval.decided_at.map(|value| value.to_rfc3339()))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use signoff_core::domain::approval::ApprovalState;
    use signoff_core::domain::approver::{Approver, ApproverId, ApproverStatus};
    use signoff_core::domain::matrix::{
        AmountRange, CompletionPolicy, Level, Matrix, MatrixCriteria, MatrixId, MatrixState,
    };
    use signoff_core::domain::request::{RequestId, RequestKind, RequestState, WorkflowRequest};
    use signoff_core::engine::Decision;
    use signoff_core::errors::WorkflowError;
    use signoff_core::notifications::{InMemoryNotifier, WorkflowEvent};

    use super::{ServiceError, WorkflowService};
    use crate::repositories::{
        ApprovalRepository, ApproverRepository, MatrixRepository, RequestRepository,
        SqlApprovalRepository, SqlApproverRepository, SqlMatrixRepository, SqlRequestRepository,
    };
    use crate::{connect_with_settings, migrations};

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

    fn draft_request(id: &str) -> WorkflowRequest {
        WorkflowRequest::new(
            RequestId(id.to_string()),
            "Data center hardware",
            RequestKind::Purchase,
            "u-requester",
            Decimal::new(5_000_000, 0),
            "USD",
            t0(),
        )
    }

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap()
    }

    struct Harness {
        pool: sqlx::SqlitePool,
        service: WorkflowService,
        notifier: Arc<InMemoryNotifier>,
    }

    async fn harness(matrix: Matrix) -> Harness {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let approvers = SqlApproverRepository::new(pool.clone());
        for id in ["u-a", "u-b", "u-c", "u-d"] {
            approvers.save(approver(id)).await.expect("save approver");
        }
        SqlMatrixRepository::new(pool.clone()).save(matrix).await.expect("save matrix");

        let notifier = Arc::new(InMemoryNotifier::default());
        let service = WorkflowService::new(pool.clone(), notifier.clone());
        Harness { pool, service, notifier }
    }

    async fn seed_request(harness: &Harness, id: &str) -> RequestId {
        SqlRequestRepository::new(harness.pool.clone())
            .save(draft_request(id))
            .await
            .expect("save request");
        RequestId(id.to_string())
    }

    #[tokio::test]
    async fn full_ladder_submit_approve_approve_approve() {
        let harness = harness(two_level_matrix()).await;
        let id = seed_request(&harness, "req-1").await;

        let submitted = harness.service.submit(&id, t0()).await.expect("submit");
        assert_eq!(submitted.state, RequestState::Pending);
        assert_eq!(submitted.current_level, Some(1));

        let after_a = harness
            .service
            .decide(&id, &ApproverId("u-a".to_string()), Decision::Approve, None, t0())
            .await
            .expect("A approves");
        assert_eq!(after_a.current_level, Some(2));
        assert_eq!(after_a.state, RequestState::Pending);

        let after_c = harness
            .service
            .decide(&id, &ApproverId("u-c".to_string()), Decision::Approve, None, t0())
            .await
            .expect("C approves");
        assert_eq!(after_c.state, RequestState::Pending);

        let after_d = harness
            .service
            .decide(&id, &ApproverId("u-d".to_string()), Decision::Approve, None, t0())
            .await
            .expect("D approves");
        assert_eq!(after_d.state, RequestState::Approved);
        assert_eq!(after_d.current_level, None);

        let approvals = SqlApprovalRepository::new(harness.pool.clone())
            .find_by_request(&id)
            .await
            .expect("load approvals");
        assert_eq!(approvals.len(), 4);
        // B never decided; the slot stays pending history.
        let level_one_pending = approvals
            .iter()
            .filter(|slot| slot.level_sequence == 1 && slot.state == ApprovalState::Pending)
            .count();
        assert_eq!(level_one_pending, 1);

        assert_eq!(
            harness.notifier.events(),
            vec![
                WorkflowEvent::Submitted,
                WorkflowEvent::Submitted,
                WorkflowEvent::Reminder,
                WorkflowEvent::Approved,
            ]
        );
    }

    #[tokio::test]
    async fn rejection_is_absorbing_and_blocks_later_decisions() {
        let harness = harness(two_level_matrix()).await;
        let id = seed_request(&harness, "req-1").await;
        harness.service.submit(&id, t0()).await.expect("submit");

        let rejected = harness
            .service
            .decide(
                &id,
                &ApproverId("u-b".to_string()),
                Decision::Reject,
                Some("Budget freeze".to_string()),
                t0(),
            )
            .await
            .expect("B rejects");
        assert_eq!(rejected.state, RequestState::Rejected);

        let error = harness
            .service
            .decide(&id, &ApproverId("u-a".to_string()), Decision::Approve, None, t0())
            .await
            .expect_err("terminal request");
        assert!(matches!(
            error,
            ServiceError::Workflow(WorkflowError::InvalidState { action: "decide", .. })
        ));

        // Level 2 was never staffed.
        let approvals = SqlApprovalRepository::new(harness.pool.clone())
            .find_by_request(&id)
            .await
            .expect("load approvals");
        assert!(approvals.iter().all(|slot| slot.level_sequence == 1));
    }

    #[tokio::test]
    async fn double_decide_does_not_double_apply() {
        let harness = harness(Matrix {
            levels: vec![level(1, CompletionPolicy::All, &["u-a", "u-b"])],
            ..two_level_matrix()
        })
        .await;
        let id = seed_request(&harness, "req-1").await;
        harness.service.submit(&id, t0()).await.expect("submit");

        harness
            .service
            .decide(&id, &ApproverId("u-a".to_string()), Decision::Approve, None, t0())
            .await
            .expect("first decision");
        let error = harness
            .service
            .decide(&id, &ApproverId("u-a".to_string()), Decision::Approve, None, t0())
            .await
            .expect_err("second decision");
        assert!(matches!(
            error,
            ServiceError::Workflow(WorkflowError::UnauthorizedApprover { .. })
        ));
    }

    #[tokio::test]
    async fn submit_without_matching_matrix_fails() {
        let mut matrix = two_level_matrix();
        matrix.criteria = MatrixCriteria::Amount(AmountRange {
            min: Decimal::new(10_000_000, 0),
            max: None,
        });
        let harness = harness(matrix).await;
        let id = seed_request(&harness, "req-1").await;

        let error = harness.service.submit(&id, t0()).await.expect_err("no rule");
        assert!(matches!(
            error,
            ServiceError::Workflow(WorkflowError::NoApplicableRule)
        ));
    }

    #[tokio::test]
    async fn cancel_marks_open_slots_cancelled() {
        let harness = harness(two_level_matrix()).await;
        let id = seed_request(&harness, "req-1").await;
        harness.service.submit(&id, t0()).await.expect("submit");

        let cancelled = harness.service.cancel(&id, t0()).await.expect("cancel");
        assert_eq!(cancelled.state, RequestState::Cancelled);

        let approvals = SqlApprovalRepository::new(harness.pool.clone())
            .find_by_request(&id)
            .await
            .expect("load approvals");
        assert!(approvals.iter().all(|slot| slot.state == ApprovalState::Cancelled));
        assert_eq!(
            harness.notifier.events(),
            vec![WorkflowEvent::Submitted, WorkflowEvent::Cancelled]
        );
    }

    #[tokio::test]
    async fn sweep_times_out_overdue_requests_and_isolates_failures() {
        let mut matrix = two_level_matrix();
        matrix.levels[0].timeout_hours = 1;
        let harness = harness(matrix).await;

        let overdue = seed_request(&harness, "req-overdue").await;
        harness.service.submit(&overdue, t0()).await.expect("submit overdue");

        let broken = seed_request(&harness, "req-broken").await;
        harness.service.submit(&broken, t0()).await.expect("submit broken");
        // Point the broken request at a level the matrix does not define so
        // its sweep item fails while the rest of the batch proceeds.
        sqlx::query("UPDATE workflow_request SET current_level = 99 WHERE id = ?")
            .bind(&broken.0)
            .execute(&harness.pool)
            .await
            .expect("corrupt current level");

        let report = harness
            .service
            .process_timeouts(t0() + Duration::hours(2))
            .await
            .expect("sweep");

        assert_eq!(report.processed, 2);
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.failed, 1);

        let swept = SqlRequestRepository::new(harness.pool.clone())
            .find_by_id(&overdue)
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(swept.state, RequestState::Timeout);
    }

    #[tokio::test]
    async fn sweep_auto_approve_level_advances() {
        let mut matrix = two_level_matrix();
        matrix.levels[0].timeout_hours = 1;
        matrix.levels[0].auto_approve_on_timeout = true;
        let harness = harness(matrix).await;

        let id = seed_request(&harness, "req-1").await;
        harness.service.submit(&id, t0()).await.expect("submit");

        let report = harness
            .service
            .process_timeouts(t0() + Duration::hours(2))
            .await
            .expect("sweep");
        assert_eq!(report.advanced, 1);

        let request = SqlRequestRepository::new(harness.pool.clone())
            .find_by_id(&id)
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(request.state, RequestState::Pending);
        assert_eq!(request.current_level, Some(2));
    }
}
