use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use signoff_core::domain::approval::Approval;
use signoff_core::domain::approver::Approver;
use signoff_core::domain::budget::{Budget, BudgetAlert, BudgetId, Commitment};
use signoff_core::domain::matrix::{Matrix, MatrixId};
use signoff_core::domain::request::{RequestId, WorkflowRequest};

pub mod approval;
pub mod approver;
pub mod budget;
pub mod matrix;
pub mod memory;
pub mod request;

pub use approval::SqlApprovalRepository;
pub use approver::SqlApproverRepository;
pub use budget::SqlBudgetRepository;
pub use matrix::SqlMatrixRepository;
pub use memory::{
    InMemoryApprovalRepository, InMemoryApproverRepository, InMemoryMatrixRepository,
    InMemoryRequestRepository,
};
pub use request::SqlRequestRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait MatrixRepository: Send + Sync {
    async fn find_by_id(&self, id: &MatrixId) -> Result<Option<Matrix>, RepositoryError>;
    async fn list_active(&self) -> Result<Vec<Matrix>, RepositoryError>;
    async fn save(&self, matrix: Matrix) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn find_by_id(&self, id: &RequestId)
        -> Result<Option<WorkflowRequest>, RepositoryError>;
    async fn save(&self, request: WorkflowRequest) -> Result<(), RepositoryError>;
    /// Pending requests whose deadline is at or before `now`, oldest first.
    async fn list_pending_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRequest>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<Approval>, RepositoryError>;
    async fn save(&self, approval: Approval) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ApproverRepository: Send + Sync {
    async fn list_all(&self) -> Result<Vec<Approver>, RepositoryError>;
    async fn save(&self, approver: Approver) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait BudgetRepository: Send + Sync {
    async fn find_by_id(&self, id: &BudgetId) -> Result<Option<Budget>, RepositoryError>;
    async fn save(&self, budget: Budget) -> Result<(), RepositoryError>;
    async fn commitments_for(&self, id: &BudgetId) -> Result<Vec<Commitment>, RepositoryError>;
    async fn save_commitment(&self, commitment: Commitment) -> Result<(), RepositoryError>;
    async fn record_alert(&self, alert: BudgetAlert) -> Result<(), RepositoryError>;
}
