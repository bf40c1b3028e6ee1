use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use signoff_core::domain::approval::{Approval, ApprovalId, ApprovalState};
use signoff_core::domain::approver::ApproverId;
use signoff_core::domain::request::RequestId;

use super::{ApprovalRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn approval_state_as_str(state: &ApprovalState) -> &'static str {
    match state {
        ApprovalState::Pending => "pending",
        ApprovalState::Approved => "approved",
        ApprovalState::Rejected => "rejected",
        ApprovalState::Cancelled => "cancelled",
        ApprovalState::Timeout => "timeout",
    }
}

pub fn parse_approval_state(s: &str) -> ApprovalState {
    match s {
        "approved" => ApprovalState::Approved,
        "rejected" => ApprovalState::Rejected,
        "cancelled" => ApprovalState::Cancelled,
        "timeout" => ApprovalState::Timeout,
        _ => ApprovalState::Pending,
    }
}

fn parse_optional_timestamp(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|value| {
        DateTime::parse_from_rfc3339(&value).map(|dt| dt.with_timezone(&Utc)).map_err(|_| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: {value}"))
        })
    })
    .transpose()
}

pub(crate) fn row_to_approval(row: &SqliteRow) -> Result<Approval, RepositoryError> {
    let id: String = row.try_get("id")?;
    let request_id: String = row.try_get("request_id")?;
    let level_sequence: i64 = row.try_get("level_sequence")?;
    let approver_id: String = row.try_get("approver_id")?;
    let delegate_id: Option<String> = row.try_get("delegate_id")?;
    let state: String = row.try_get("state")?;
    let comment: Option<String> = row.try_get("comment")?;
    let deadline: Option<String> = row.try_get("deadline")?;
    let created_at: String = row.try_get("created_at")?;
    let decided_at: Option<String> = row.try_get("decided_at")?;

    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            RepositoryError::Decode(format!("invalid timestamp in `created_at`: {created_at}"))
        })?;

    Ok(Approval {
        id: ApprovalId(id),
        request_id: RequestId(request_id),
        level_sequence: level_sequence as u32,
        approver_id: ApproverId(approver_id),
        delegate_id: delegate_id.map(ApproverId),
        state: parse_approval_state(&state),
        comment,
        deadline: parse_optional_timestamp("deadline", deadline)?,
        created_at,
        decided_at: parse_optional_timestamp("decided_at", decided_at)?,
    })
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, level_sequence, approver_id, delegate_id, state, comment,
                    deadline, created_at, decided_at
             FROM workflow_approval
             WHERE request_id = ?
             ORDER BY level_sequence ASC, approver_id ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approval).collect()
    }

    async fn save(&self, approval: Approval) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO workflow_approval (id, request_id, level_sequence, approver_id,
                                            delegate_id, state, comment, deadline, created_at,
                                            decided_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 delegate_id = excluded.delegate_id,
                 state = excluded.state,
                 comment = excluded.comment,
                 deadline = excluded.deadline,
                 decided_at = excluded.decided_at",
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
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use signoff_core::domain::approval::{Approval, ApprovalId, ApprovalState};
    use signoff_core::domain::approver::ApproverId;
    use signoff_core::domain::request::{RequestId, RequestKind, WorkflowRequest};

    use super::SqlApprovalRepository;
    use crate::repositories::{ApprovalRepository, RequestRepository, SqlRequestRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    /// Insert a parent request so FK constraints hold.
    async fn insert_request(pool: &sqlx::SqlitePool, request_id: &str) {
        let repo = SqlRequestRepository::new(pool.clone());
        let request = WorkflowRequest::new(
            RequestId(request_id.to_string()),
            "Parent request",
            RequestKind::Purchase,
            "u-requester",
            Decimal::new(1_000, 0),
            "USD",
            Utc::now(),
        );
        repo.save(request).await.expect("insert parent request");
    }

    fn sample_approval(id: &str, request_id: &str, approver: &str) -> Approval {
        Approval {
            id: ApprovalId(id.to_string()),
            request_id: RequestId(request_id.to_string()),
            level_sequence: 1,
            approver_id: ApproverId(approver.to_string()),
            delegate_id: None,
            state: ApprovalState::Pending,
            comment: None,
            deadline: None,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    #[tokio::test]
    async fn save_and_find_by_request_groups_slots() {
        let pool = setup().await;
        insert_request(&pool, "req-1").await;
        insert_request(&pool, "req-2").await;

        let repo = SqlApprovalRepository::new(pool);
        repo.save(sample_approval("apv-1", "req-1", "u-a")).await.expect("save 1");
        repo.save(sample_approval("apv-2", "req-1", "u-b")).await.expect("save 2");
        repo.save(sample_approval("apv-3", "req-2", "u-a")).await.expect("save 3");

        let slots = repo.find_by_request(&RequestId("req-1".to_string())).await.expect("find");
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|slot| slot.request_id.0 == "req-1"));
    }

    #[tokio::test]
    async fn save_upserts_decision_fields() {
        let pool = setup().await;
        insert_request(&pool, "req-1").await;

        let repo = SqlApprovalRepository::new(pool);
        let approval = sample_approval("apv-1", "req-1", "u-a");
        repo.save(approval.clone()).await.expect("save");

        let mut decided = approval;
        decided.state = ApprovalState::Approved;
        decided.comment = Some("Looks good".to_string());
        decided.decided_at = Some(Utc::now());
        repo.save(decided).await.expect("upsert");

        let slots = repo.find_by_request(&RequestId("req-1".to_string())).await.expect("find");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].state, ApprovalState::Approved);
        assert_eq!(slots[0].comment.as_deref(), Some("Looks good"));
        assert!(slots[0].decided_at.is_some());
    }
}
