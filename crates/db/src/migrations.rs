use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_TABLES: &[&str] = &[
        "approval_matrix",
        "matrix_level",
        "approver",
        "workflow_request",
        "workflow_approval",
        "budget",
        "budget_commitment",
        "budget_alert",
    ];

    const MANAGED_INDEXES: &[&str] = &[
        "idx_approval_matrix_state",
        "idx_matrix_level_matrix_id",
        "idx_workflow_request_state",
        "idx_workflow_request_deadline",
        "idx_workflow_approval_request_id",
        "idx_workflow_approval_approver_id",
        "idx_budget_commitment_budget_id",
        "idx_budget_alert_budget_id",
    ];

    async fn object_count(pool: &sqlx::SqlitePool, kind: &str, name: &str) -> i64 {
        sqlx::query("SELECT COUNT(*) AS count FROM sqlite_master WHERE type = ? AND name = ?")
            .bind(kind)
            .bind(name)
            .fetch_one(pool)
            .await
            .expect("query sqlite_master")
            .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in MANAGED_TABLES {
            assert_eq!(object_count(&pool, "table", table).await, 1, "missing table {table}");
        }
        for index in MANAGED_INDEXES {
            assert_eq!(object_count(&pool, "index", index).await, 1, "missing index {index}");
        }
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        for table in MANAGED_TABLES {
            assert_eq!(object_count(&pool, "table", table).await, 0, "leftover table {table}");
        }
    }

    #[tokio::test]
    async fn migrations_up_down_up_converge() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        run_pending(&pool).await.expect("re-run migrations");

        for table in MANAGED_TABLES {
            assert_eq!(object_count(&pool, "table", table).await, 1, "missing table {table}");
        }
    }
}
