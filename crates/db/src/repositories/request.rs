use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use signoff_core::domain::matrix::MatrixId;
use signoff_core::domain::request::{
    DocumentRef, RequestId, RequestKind, RequestState, WorkflowRequest,
};

use super::{RepositoryError, RequestRepository};
use crate::DbPool;

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn request_state_as_str(state: &RequestState) -> &'static str {
    match state {
        RequestState::Draft => "draft",
        RequestState::Pending => "pending",
        RequestState::Approved => "approved",
        RequestState::Rejected => "rejected",
        RequestState::Cancelled => "cancelled",
        RequestState::Escalated => "escalated",
        RequestState::Timeout => "timeout",
    }
}

pub fn parse_request_state(s: &str) -> RequestState {
    match s {
        "pending" => RequestState::Pending,
        "approved" => RequestState::Approved,
        "rejected" => RequestState::Rejected,
        "cancelled" => RequestState::Cancelled,
        "escalated" => RequestState::Escalated,
        "timeout" => RequestState::Timeout,
        _ => RequestState::Draft,
    }
}

pub fn request_kind_as_str(kind: &RequestKind) -> &'static str {
    match kind {
        RequestKind::Purchase => "purchase",
        RequestKind::Expense => "expense",
        RequestKind::Leave => "leave",
        RequestKind::Travel => "travel",
        RequestKind::Contract => "contract",
        RequestKind::Budget => "budget",
        RequestKind::Overbudget => "overbudget",
        RequestKind::Custom => "custom",
    }
}

fn parse_request_kind(s: &str) -> RequestKind {
    match s {
        "purchase" => RequestKind::Purchase,
        "expense" => RequestKind::Expense,
        "leave" => RequestKind::Leave,
        "travel" => RequestKind::Travel,
        "contract" => RequestKind::Contract,
        "budget" => RequestKind::Budget,
        "overbudget" => RequestKind::Overbudget,
        _ => RequestKind::Custom,
    }
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {raw}")))
}

fn parse_optional_timestamp(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|value| parse_timestamp(column, &value)).transpose()
}

pub(crate) fn row_to_request(row: &SqliteRow) -> Result<WorkflowRequest, RepositoryError> {
    let id: String = row.try_get("id")?;
    let name: String = row.try_get("name")?;
    let kind: String = row.try_get("kind")?;
    let requester_id: String = row.try_get("requester_id")?;
    let department: Option<String> = row.try_get("department")?;
    let category: Option<String> = row.try_get("category")?;
    let amount: String = row.try_get("amount")?;
    let currency: String = row.try_get("currency")?;
    let custom_data: Option<String> = row.try_get("custom_data")?;
    let matrix_id: Option<String> = row.try_get("matrix_id")?;
    let current_level: Option<i64> = row.try_get("current_level")?;
    let state: String = row.try_get("state")?;
    let timeout_hours: i64 = row.try_get("timeout_hours")?;
    let deadline: Option<String> = row.try_get("deadline")?;
    let source_model: Option<String> = row.try_get("source_model")?;
    let source_record_id: Option<String> = row.try_get("source_record_id")?;
    let created_at: String = row.try_get("created_at")?;
    let submitted_at: Option<String> = row.try_get("submitted_at")?;
    let closed_at: Option<String> = row.try_get("closed_at")?;

    let amount: Decimal = amount
        .parse()
        .map_err(|_| RepositoryError::Decode(format!("invalid decimal in `amount`: {amount}")))?;
    let custom_data = custom_data
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| RepositoryError::Decode(format!("invalid `custom_data`: {e}")))
        })
        .transpose()?;
    let source = match (source_model, source_record_id) {
        (Some(model), Some(record_id)) => Some(DocumentRef { model, record_id }),
        _ => None,
    };

    Ok(WorkflowRequest {
        id: RequestId(id),
        name,
        kind: parse_request_kind(&kind),
        requester_id,
        department,
        category,
        amount,
        currency,
        custom_data,
        matrix_id: matrix_id.map(MatrixId),
        current_level: current_level.map(|value| value as u32),
        state: parse_request_state(&state),
        timeout_hours: timeout_hours as u32,
        deadline: parse_optional_timestamp("deadline", deadline)?,
        source,
        created_at: parse_timestamp("created_at", &created_at)?,
        submitted_at: parse_optional_timestamp("submitted_at", submitted_at)?,
        closed_at: parse_optional_timestamp("closed_at", closed_at)?,
    })
}

const REQUEST_COLUMNS: &str = "id, name, kind, requester_id, department, category, amount,
    currency, custom_data, matrix_id, current_level, state, timeout_hours, deadline,
    source_model, source_record_id, created_at, submitted_at, closed_at";

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn find_by_id(
        &self,
        id: &RequestId,
    ) -> Result<Option<WorkflowRequest>, RepositoryError> {
        let query = format!("SELECT {REQUEST_COLUMNS} FROM workflow_request WHERE id = ?");
        let row = sqlx::query(&query).bind(&id.0).fetch_optional(&self.pool).await?;

        match row {
            Some(ref row) => Ok(Some(row_to_request(row)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, request: WorkflowRequest) -> Result<(), RepositoryError> {
        let custom_data = request
            .custom_data
            .as_ref()
            .map(|value| {
                serde_json::to_string(value)
                    .map_err(|e| RepositoryError::Decode(format!("custom_data encode failed: {e}")))
            })
            .transpose()?;

        sqlx::query(
            "INSERT INTO workflow_request (id, name, kind, requester_id, department, category,
                                           amount, currency, custom_data, matrix_id,
                                           current_level, state, timeout_hours, deadline,
                                           source_model, source_record_id, created_at,
                                           submitted_at, closed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 kind = excluded.kind,
                 requester_id = excluded.requester_id,
                 department = excluded.department,
                 category = excluded.category,
                 amount = excluded.amount,
                 currency = excluded.currency,
                 custom_data = excluded.custom_data,
                 matrix_id = excluded.matrix_id,
                 current_level = excluded.current_level,
                 state = excluded.state,
                 timeout_hours = excluded.timeout_hours,
                 deadline = excluded.deadline,
                 source_model = excluded.source_model,
                 source_record_id = excluded.source_record_id,
                 submitted_at = excluded.submitted_at,
                 closed_at = excluded.closed_at",
        )
        .bind(&request.id.0)
        .bind(&request.name)
        .bind(request_kind_as_str(&request.kind))
        .bind(&request.requester_id)
        .bind(&request.department)
        .bind(&request.category)
        .bind(request.amount.to_string())
        .bind(&request.currency)
        .bind(&custom_data)
        .bind(request.matrix_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.current_level.map(i64::from))
        .bind(request_state_as_str(&request.state))
        .bind(i64::from(request.timeout_hours))
        .bind(request.deadline.map(|value| value.to_rfc3339()))
        .bind(request.source.as_ref().map(|source| source.model.as_str()))
        .bind(request.source.as_ref().map(|source| source.record_id.as_str()))
        .bind(request.created_at.to_rfc3339())
        .bind(request.submitted_at.map(|value| value.to_rfc3339()))
        .bind(request.closed_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_pending_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRequest>, RepositoryError> {
        let query = format!(
            "SELECT {REQUEST_COLUMNS} FROM workflow_request
             WHERE state = 'pending' AND deadline IS NOT NULL AND deadline <= ?
             ORDER BY deadline ASC"
        );
        let rows = sqlx::query(&query).bind(now.to_rfc3339()).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_request).collect()
    }
}
