use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use signoff_core::domain::budget::{
    AlertSeverity, AlertThreshold, Budget, BudgetAlert, BudgetId, BudgetScope, BudgetState,
    Commitment, CommitmentId, CommitmentState,
};
use signoff_core::domain::request::DocumentRef;

use super::{BudgetRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBudgetRepository {
    pool: DbPool,
}

impl SqlBudgetRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn budget_state_as_str(state: &BudgetState) -> &'static str {
    match state {
        BudgetState::Draft => "draft",
        BudgetState::Active => "active",
        BudgetState::Closed => "closed",
        BudgetState::Cancelled => "cancelled",
    }
}

fn parse_budget_state(s: &str) -> BudgetState {
    match s {
        "active" => BudgetState::Active,
        "closed" => BudgetState::Closed,
        "cancelled" => BudgetState::Cancelled,
        _ => BudgetState::Draft,
    }
}

pub fn commitment_state_as_str(state: &CommitmentState) -> &'static str {
    match state {
        CommitmentState::Draft => "draft",
        CommitmentState::Active => "active",
        CommitmentState::Confirmed => "confirmed",
        CommitmentState::Cancelled => "cancelled",
        CommitmentState::Released => "released",
    }
}

fn parse_commitment_state(s: &str) -> CommitmentState {
    match s {
        "active" => CommitmentState::Active,
        "confirmed" => CommitmentState::Confirmed,
        "cancelled" => CommitmentState::Cancelled,
        "released" => CommitmentState::Released,
        _ => CommitmentState::Draft,
    }
}

fn severity_as_str(severity: &AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Warning => "warning",
        AlertSeverity::Danger => "danger",
        AlertSeverity::Critical => "critical",
    }
}

fn parse_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    raw.parse()
        .map_err(|_| RepositoryError::Decode(format!("invalid decimal in `{column}`: {raw}")))
}

fn parse_date(column: &str, raw: &str) -> Result<NaiveDate, RepositoryError> {
    raw.parse()
        .map_err(|_| RepositoryError::Decode(format!("invalid date in `{column}`: {raw}")))
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {raw}")))
}

fn row_to_budget(row: &SqliteRow) -> Result<Budget, RepositoryError> {
    let id: String = row.try_get("id")?;
    let name: String = row.try_get("name")?;
    let code: String = row.try_get("code")?;
    let date_from: String = row.try_get("date_from")?;
    let date_to: String = row.try_get("date_to")?;
    let department: Option<String> = row.try_get("department")?;
    let project: Option<String> = row.try_get("project")?;
    let cost_center: Option<String> = row.try_get("cost_center")?;
    let total: String = row.try_get("total")?;
    let currency: String = row.try_get("currency")?;
    let state: String = row.try_get("state")?;
    let allow_overbudget: i64 = row.try_get("allow_overbudget")?;
    let overbudget_approval_required: i64 = row.try_get("overbudget_approval_required")?;
    let thresholds: String = row.try_get("thresholds")?;
    let notification_recipients: String = row.try_get("notification_recipients")?;

    Ok(Budget {
        id: BudgetId(id),
        name,
        code,
        date_from: parse_date("date_from", &date_from)?,
        date_to: parse_date("date_to", &date_to)?,
        scope: BudgetScope { department, project, cost_center },
        total: parse_decimal("total", &total)?,
        currency,
        state: parse_budget_state(&state),
        allow_overbudget: allow_overbudget != 0,
        overbudget_approval_required: overbudget_approval_required != 0,
        thresholds: serde_json::from_str::<Vec<AlertThreshold>>(&thresholds)
            .map_err(|e| RepositoryError::Decode(format!("invalid `thresholds`: {e}")))?,
        notification_recipients: serde_json::from_str(&notification_recipients).map_err(|e| {
            RepositoryError::Decode(format!("invalid `notification_recipients`: {e}"))
        })?,
    })
}

fn row_to_commitment(row: &SqliteRow) -> Result<Commitment, RepositoryError> {
    let id: String = row.try_get("id")?;
    let budget_id: String = row.try_get("budget_id")?;
    let amount: String = row.try_get("amount")?;
    let source_model: String = row.try_get("source_model")?;
    let source_record_id: String = row.try_get("source_record_id")?;
    let state: String = row.try_get("state")?;
    let description: Option<String> = row.try_get("description")?;
    let committed_at: String = row.try_get("committed_at")?;
    let released_at: Option<String> = row.try_get("released_at")?;

    Ok(Commitment {
        id: CommitmentId(id),
        budget_id: BudgetId(budget_id),
        amount: parse_decimal("amount", &amount)?,
        source: DocumentRef { model: source_model, record_id: source_record_id },
        state: parse_commitment_state(&state),
        description,
        committed_at: parse_timestamp("committed_at", &committed_at)?,
        released_at: released_at
            .map(|value| parse_timestamp("released_at", &value))
            .transpose()?,
    })
}

#[async_trait::async_trait]
impl BudgetRepository for SqlBudgetRepository {
    async fn find_by_id(&self, id: &BudgetId) -> Result<Option<Budget>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, code, date_from, date_to, department, project, cost_center, total,
                    currency, state, allow_overbudget, overbudget_approval_required, thresholds,
                    notification_recipients
             FROM budget WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_budget).transpose()
    }

    async fn save(&self, budget: Budget) -> Result<(), RepositoryError> {
        let thresholds = serde_json::to_string(&budget.thresholds)
            .map_err(|e| RepositoryError::Decode(format!("thresholds encode failed: {e}")))?;
        let recipients = serde_json::to_string(&budget.notification_recipients).map_err(|e| {
            RepositoryError::Decode(format!("notification_recipients encode failed: {e}"))
        })?;

        sqlx::query(
            "INSERT INTO budget (id, name, code, date_from, date_to, department, project,
                                 cost_center, total, currency, state, allow_overbudget,
                                 overbudget_approval_required, thresholds,
                                 notification_recipients)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 code = excluded.code,
                 date_from = excluded.date_from,
                 date_to = excluded.date_to,
                 department = excluded.department,
                 project = excluded.project,
                 cost_center = excluded.cost_center,
                 total = excluded.total,
                 currency = excluded.currency,
                 state = excluded.state,
                 allow_overbudget = excluded.allow_overbudget,
                 overbudget_approval_required = excluded.overbudget_approval_required,
                 thresholds = excluded.thresholds,
                 notification_recipients = excluded.notification_recipients",
        )
        .bind(&budget.id.0)
        .bind(&budget.name)
        .bind(&budget.code)
        .bind(budget.date_from.to_string())
        .bind(budget.date_to.to_string())
        .bind(&budget.scope.department)
        .bind(&budget.scope.project)
        .bind(&budget.scope.cost_center)
        .bind(budget.total.to_string())
        .bind(&budget.currency)
        .bind(budget_state_as_str(&budget.state))
        .bind(i64::from(budget.allow_overbudget))
        .bind(i64::from(budget.overbudget_approval_required))
        .bind(&thresholds)
        .bind(&recipients)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn commitments_for(&self, id: &BudgetId) -> Result<Vec<Commitment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, budget_id, amount, source_model, source_record_id, state, description,
                    committed_at, released_at
             FROM budget_commitment
             WHERE budget_id = ?
             ORDER BY committed_at DESC, id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_commitment).collect()
    }

    async fn save_commitment(&self, commitment: Commitment) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO budget_commitment (id, budget_id, amount, source_model,
                                            source_record_id, state, description, committed_at,
                                            released_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 state = excluded.state,
                 description = excluded.description,
                 released_at = excluded.released_at",
        )
        .bind(&commitment.id.0)
        .bind(&commitment.budget_id.0)
        .bind(commitment.amount.to_string())
        .bind(&commitment.source.model)
        .bind(&commitment.source.record_id)
        .bind(commitment_state_as_str(&commitment.state))
        .bind(&commitment.description)
        .bind(commitment.committed_at.to_rfc3339())
        .bind(commitment.released_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_alert(&self, alert: BudgetAlert) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO budget_alert (id, budget_id, threshold_pct, severity, utilization_pct,
                                       raised_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&alert.budget_id.0)
        .bind(alert.threshold_pct.to_string())
        .bind(severity_as_str(&alert.severity))
        .bind(alert.utilization_pct.to_string())
        .bind(alert.raised_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
