use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use signoff_core::domain::approver::ApproverId;
use signoff_core::domain::matrix::{
    CompletionPolicy, Level, Matrix, MatrixCriteria, MatrixId, MatrixState,
};

use super::{MatrixRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMatrixRepository {
    pool: DbPool,
}

impl SqlMatrixRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn matrix_state_as_str(state: &MatrixState) -> &'static str {
    match state {
        MatrixState::Draft => "draft",
        MatrixState::Active => "active",
        MatrixState::Archived => "archived",
    }
}

fn parse_matrix_state(s: &str) -> MatrixState {
    match s {
        "active" => MatrixState::Active,
        "archived" => MatrixState::Archived,
        _ => MatrixState::Draft,
    }
}

pub fn policy_as_str(policy: &CompletionPolicy) -> &'static str {
    match policy {
        CompletionPolicy::Single => "single",
        CompletionPolicy::Any => "any",
        CompletionPolicy::All => "all",
        CompletionPolicy::Multiple => "multiple",
        CompletionPolicy::Percentage => "percentage",
        CompletionPolicy::Quorum => "quorum",
    }
}

fn parse_policy(s: &str) -> CompletionPolicy {
    match s {
        "any" => CompletionPolicy::Any,
        "all" => CompletionPolicy::All,
        "multiple" => CompletionPolicy::Multiple,
        "percentage" => CompletionPolicy::Percentage,
        "quorum" => CompletionPolicy::Quorum,
        _ => CompletionPolicy::Single,
    }
}

fn decode<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|e| RepositoryError::Decode(format!("invalid `{column}` payload: {e}")))
}

fn parse_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    raw.parse()
        .map_err(|_| RepositoryError::Decode(format!("invalid decimal in `{column}`: {raw}")))
}

fn level_from_row(row: &SqliteRow) -> Result<Level, RepositoryError> {
    let sequence: i64 = row.try_get("sequence")?;
    let name: String = row.try_get("name")?;
    let policy: String = row.try_get("policy")?;
    let required_approvals: i64 = row.try_get("required_approvals")?;
    let approval_percentage: String = row.try_get("approval_percentage")?;
    let timeout_hours: i64 = row.try_get("timeout_hours")?;
    let auto_approve: i64 = row.try_get("auto_approve_on_timeout")?;
    let approver_ids: String = row.try_get("approver_ids")?;
    let approver_groups: String = row.try_get("approver_groups")?;
    let escalation_user_ids: String = row.try_get("escalation_user_ids")?;

    Ok(Level {
        sequence: sequence as u32,
        name,
        approver_ids: decode::<Vec<ApproverId>>("approver_ids", &approver_ids)?,
        approver_groups: decode::<Vec<String>>("approver_groups", &approver_groups)?,
        policy: parse_policy(&policy),
        required_approvals: required_approvals as u32,
        approval_percentage: parse_decimal("approval_percentage", &approval_percentage)?,
        timeout_hours: timeout_hours as u32,
        auto_approve_on_timeout: auto_approve != 0,
        escalation_user_ids: decode::<Vec<ApproverId>>(
            "escalation_user_ids",
            &escalation_user_ids,
        )?,
    })
}

impl SqlMatrixRepository {
    async fn levels_for(&self, matrix_id: &str) -> Result<Vec<Level>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT sequence, name, policy, required_approvals, approval_percentage,
                    timeout_hours, auto_approve_on_timeout, approver_ids, approver_groups,
                    escalation_user_ids
             FROM matrix_level WHERE matrix_id = ? ORDER BY sequence ASC",
        )
        .bind(matrix_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(level_from_row).collect()
    }

    async fn matrix_from_row(&self, row: &SqliteRow) -> Result<Matrix, RepositoryError> {
        let id: String = row.try_get("id")?;
        let name: String = row.try_get("name")?;
        let sequence: i64 = row.try_get("sequence")?;
        let state: String = row.try_get("state")?;
        let criteria: String = row.try_get("criteria")?;

        let levels = self.levels_for(&id).await?;

        Ok(Matrix {
            id: MatrixId(id),
            name,
            sequence: sequence as i32,
            state: parse_matrix_state(&state),
            criteria: decode::<MatrixCriteria>("criteria", &criteria)?,
            levels,
        })
    }
}

#[async_trait::async_trait]
impl MatrixRepository for SqlMatrixRepository {
    async fn find_by_id(&self, id: &MatrixId) -> Result<Option<Matrix>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, sequence, state, criteria FROM approval_matrix WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => Ok(Some(self.matrix_from_row(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_active(&self) -> Result<Vec<Matrix>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, sequence, state, criteria
             FROM approval_matrix WHERE state = 'active'
             ORDER BY sequence ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut matrices = Vec::with_capacity(rows.len());
        for row in &rows {
            matrices.push(self.matrix_from_row(row).await?);
        }
        Ok(matrices)
    }

    async fn save(&self, matrix: Matrix) -> Result<(), RepositoryError> {
        let criteria = serde_json::to_string(&matrix.criteria)
            .map_err(|e| RepositoryError::Decode(format!("criteria encode failed: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_matrix (id, name, sequence, state, criteria, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 sequence = excluded.sequence,
                 state = excluded.state,
                 criteria = excluded.criteria,
                 updated_at = excluded.updated_at",
        )
        .bind(&matrix.id.0)
        .bind(&matrix.name)
        .bind(i64::from(matrix.sequence))
        .bind(matrix_state_as_str(&matrix.state))
        .bind(&criteria)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM matrix_level WHERE matrix_id = ?")
            .bind(&matrix.id.0)
            .execute(&mut *tx)
            .await?;

        for level in &matrix.levels {
            let approver_ids = serde_json::to_string(&level.approver_ids)
                .map_err(|e| RepositoryError::Decode(format!("approver_ids encode failed: {e}")))?;
            let approver_groups = serde_json::to_string(&level.approver_groups).map_err(|e| {
                RepositoryError::Decode(format!("approver_groups encode failed: {e}"))
            })?;
            let escalation_user_ids = serde_json::to_string(&level.escalation_user_ids)
                .map_err(|e| {
                    RepositoryError::Decode(format!("escalation_user_ids encode failed: {e}"))
                })?;

            sqlx::query(
                "INSERT INTO matrix_level (matrix_id, sequence, name, policy, required_approvals,
                                           approval_percentage, timeout_hours,
                                           auto_approve_on_timeout, approver_ids, approver_groups,
                                           escalation_user_ids)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&matrix.id.0)
            .bind(i64::from(level.sequence))
            .bind(&level.name)
            .bind(policy_as_str(&level.policy))
            .bind(i64::from(level.required_approvals))
            .bind(level.approval_percentage.to_string())
            .bind(i64::from(level.timeout_hours))
            .bind(i64::from(level.auto_approve_on_timeout))
            .bind(&approver_ids)
            .bind(&approver_groups)
            .bind(&escalation_user_ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
