use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use signoff_core::domain::approver::{
    Approver, ApproverId, ApproverStatus, AvailabilityWindow,
};

use super::{ApproverRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApproverRepository {
    pool: DbPool,
}

impl SqlApproverRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn approver_status_as_str(status: &ApproverStatus) -> &'static str {
    match status {
        ApproverStatus::Available => "available",
        ApproverStatus::Busy => "busy",
        ApproverStatus::Away => "away",
        ApproverStatus::Offline => "offline",
        ApproverStatus::Delegated => "delegated",
    }
}

fn parse_approver_status(s: &str) -> ApproverStatus {
    match s {
        "busy" => ApproverStatus::Busy,
        "away" => ApproverStatus::Away,
        "offline" => ApproverStatus::Offline,
        "delegated" => ApproverStatus::Delegated,
        _ => ApproverStatus::Available,
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    raw: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|e| RepositoryError::Decode(format!("invalid `{column}` payload: {e}")))
}

fn row_to_approver(row: &SqliteRow) -> Result<Approver, RepositoryError> {
    let id: String = row.try_get("id")?;
    let name: String = row.try_get("name")?;
    let groups: String = row.try_get("groups")?;
    let max_approval_amount: Option<String> = row.try_get("max_approval_amount")?;
    let status: String = row.try_get("status")?;
    let auto_delegate: i64 = row.try_get("auto_delegate")?;
    let delegate_to: Option<String> = row.try_get("delegate_to")?;
    let backups: String = row.try_get("backups")?;
    let availability: Option<String> = row.try_get("availability")?;

    let max_approval_amount = max_approval_amount
        .map(|raw| {
            raw.parse::<Decimal>().map_err(|_| {
                RepositoryError::Decode(format!("invalid decimal in `max_approval_amount`: {raw}"))
            })
        })
        .transpose()?;
    let window = availability
        .map(|raw| decode_json::<AvailabilityWindow>("availability", &raw))
        .transpose()?;

    Ok(Approver {
        id: ApproverId(id),
        name,
        groups: decode_json::<Vec<String>>("groups", &groups)?,
        max_approval_amount,
        window,
        status: parse_approver_status(&status),
        auto_delegate: auto_delegate != 0,
        delegate_to: delegate_to.map(ApproverId),
        backups: decode_json::<Vec<ApproverId>>("backups", &backups)?,
    })
}

#[async_trait::async_trait]
impl ApproverRepository for SqlApproverRepository {
    async fn list_all(&self) -> Result<Vec<Approver>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, groups, max_approval_amount, status, auto_delegate, delegate_to,
                    backups, availability
             FROM approver ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approver).collect()
    }

    async fn save(&self, approver: Approver) -> Result<(), RepositoryError> {
        let groups = serde_json::to_string(&approver.groups)
            .map_err(|e| RepositoryError::Decode(format!("groups encode failed: {e}")))?;
        let backups = serde_json::to_string(&approver.backups)
            .map_err(|e| RepositoryError::Decode(format!("backups encode failed: {e}")))?;
        let availability = approver
            .window
            .as_ref()
            .map(|window| {
                serde_json::to_string(window).map_err(|e| {
                    RepositoryError::Decode(format!("availability encode failed: {e}"))
                })
            })
            .transpose()?;

        sqlx::query(
            "INSERT INTO approver (id, name, groups, max_approval_amount, status, auto_delegate,
                                   delegate_to, backups, availability)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 groups = excluded.groups,
                 max_approval_amount = excluded.max_approval_amount,
                 status = excluded.status,
                 auto_delegate = excluded.auto_delegate,
                 delegate_to = excluded.delegate_to,
                 backups = excluded.backups,
                 availability = excluded.availability",
        )
        .bind(&approver.id.0)
        .bind(&approver.name)
        .bind(&groups)
        .bind(approver.max_approval_amount.map(|amount| amount.to_string()))
        .bind(approver_status_as_str(&approver.status))
        .bind(i64::from(approver.auto_delegate))
        .bind(approver.delegate_to.as_ref().map(|id| id.0.as_str()))
        .bind(&backups)
        .bind(&availability)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
