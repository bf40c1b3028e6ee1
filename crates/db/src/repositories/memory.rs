use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use signoff_core::domain::approval::Approval;
use signoff_core::domain::approver::Approver;
use signoff_core::domain::matrix::{Matrix, MatrixId, MatrixState};
use signoff_core::domain::request::{RequestId, RequestState, WorkflowRequest};

use super::{
    ApprovalRepository, ApproverRepository, MatrixRepository, RepositoryError, RequestRepository,
};

#[derive(Default)]
pub struct InMemoryMatrixRepository {
    matrices: RwLock<HashMap<String, Matrix>>,
}

#[async_trait::async_trait]
impl MatrixRepository for InMemoryMatrixRepository {
    async fn find_by_id(&self, id: &MatrixId) -> Result<Option<Matrix>, RepositoryError> {
        let matrices = self.matrices.read().await;
        Ok(matrices.get(&id.0).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Matrix>, RepositoryError> {
        let matrices = self.matrices.read().await;
        let mut active: Vec<Matrix> = matrices
            .values()
            .filter(|matrix| matrix.state == MatrixState::Active)
            .cloned()
            .collect();
        active.sort_by(|left, right| {
            left.sequence.cmp(&right.sequence).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(active)
    }

    async fn save(&self, matrix: Matrix) -> Result<(), RepositoryError> {
        let mut matrices = self.matrices.write().await;
        matrices.insert(matrix.id.0.clone(), matrix);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRequestRepository {
    requests: RwLock<HashMap<String, WorkflowRequest>>,
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn find_by_id(
        &self,
        id: &RequestId,
    ) -> Result<Option<WorkflowRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn save(&self, request: WorkflowRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        requests.insert(request.id.0.clone(), request);
        Ok(())
    }

    async fn list_pending_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut due: Vec<WorkflowRequest> = requests
            .values()
            .filter(|request| {
                request.state == RequestState::Pending
                    && request.deadline.is_some_and(|deadline| deadline <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|request| request.deadline);
        Ok(due)
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    approvals: RwLock<HashMap<String, Approval>>,
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn find_by_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        let mut slots: Vec<Approval> = approvals
            .values()
            .filter(|approval| approval.request_id == *request_id)
            .cloned()
            .collect();
        slots.sort_by(|left, right| {
            left.level_sequence
                .cmp(&right.level_sequence)
                .then_with(|| left.approver_id.0.cmp(&right.approver_id.0))
        });
        Ok(slots)
    }

    async fn save(&self, approval: Approval) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write().await;
        approvals.insert(approval.id.0.clone(), approval);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryApproverRepository {
    approvers: RwLock<HashMap<String, Approver>>,
}

#[async_trait::async_trait]
impl ApproverRepository for InMemoryApproverRepository {
    async fn list_all(&self) -> Result<Vec<Approver>, RepositoryError> {
        let approvers = self.approvers.read().await;
        let mut all: Vec<Approver> = approvers.values().cloned().collect();
        all.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(all)
    }

    async fn save(&self, approver: Approver) -> Result<(), RepositoryError> {
        let mut approvers = self.approvers.write().await;
        approvers.insert(approver.id.0.clone(), approver);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use signoff_core::domain::matrix::{
        AmountRange, Matrix, MatrixCriteria, MatrixId, MatrixState,
    };
    use signoff_core::domain::request::{RequestId, RequestKind, RequestState, WorkflowRequest};

    use super::{InMemoryMatrixRepository, InMemoryRequestRepository};
    use crate::repositories::{MatrixRepository, RequestRepository};

    fn matrix(id: &str, state: MatrixState, sequence: i32) -> Matrix {
        Matrix {
            id: MatrixId(id.to_string()),
            name: id.to_string(),
            sequence,
            state,
            criteria: MatrixCriteria::Amount(AmountRange { min: Decimal::ZERO, max: None }),
            levels: Vec::new(),
        }
    }

    #[tokio::test]
    async fn list_active_filters_and_orders_like_the_sql_repository() {
        let repo = InMemoryMatrixRepository::default();
        repo.save(matrix("mx-b", MatrixState::Active, 20)).await.expect("save");
        repo.save(matrix("mx-a", MatrixState::Active, 10)).await.expect("save");
        repo.save(matrix("mx-draft", MatrixState::Draft, 1)).await.expect("save");

        let active = repo.list_active().await.expect("list");
        let ids: Vec<&str> = active.iter().map(|matrix| matrix.id.0.as_str()).collect();
        assert_eq!(ids, vec!["mx-a", "mx-b"]);
    }

    #[tokio::test]
    async fn sweep_filter_matches_pending_past_deadline_only() {
        let repo = InMemoryRequestRepository::default();
        let now = Utc::now();

        let mut overdue = WorkflowRequest::new(
            RequestId("req-overdue".to_string()),
            "Overdue",
            RequestKind::Expense,
            "u-requester",
            Decimal::new(100, 0),
            "USD",
            now,
        );
        overdue.state = RequestState::Pending;
        overdue.deadline = Some(now - Duration::hours(1));
        repo.save(overdue).await.expect("save");

        let mut open_ended = WorkflowRequest::new(
            RequestId("req-open".to_string()),
            "Open ended",
            RequestKind::Expense,
            "u-requester",
            Decimal::new(100, 0),
            "USD",
            now,
        );
        open_ended.state = RequestState::Pending;
        repo.save(open_ended).await.expect("save");

        let due = repo.list_pending_past_deadline(now).await.expect("sweep");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id.0, "req-overdue");
    }
}
