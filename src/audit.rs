//! Append-only audit log.
//!
//! Writes go through [`append`] on the caller's open connection or
//! transaction, so a failed audit write aborts the enclosing business
//! mutation instead of being silently dropped.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{Row, SqliteConnection};

use crate::db::Database;
use crate::error::Result;

pub mod action {
    pub const LOGIN: &str = "LOGIN";
    pub const LOGOUT: &str = "LOGOUT";
    pub const CREATE: &str = "CREATE";
    pub const UPDATE: &str = "UPDATE";
    pub const RELEASE: &str = "RELEASE";
    pub const REJECT: &str = "REJECT";
    pub const RECALL: &str = "RECALL";
    pub const SCAN: &str = "SCAN";
}

/// One state-changing action, recorded in the same transaction that applied
/// it.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub operator_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub old_value: String,
    pub new_value: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

/// Append one audit row on an open connection. Errors propagate to the
/// caller and roll the enclosing transaction back.
#[allow(clippy::too_many_arguments)]
pub async fn append(
    conn: &mut SqliteConnection,
    operator_id: Option<i64>,
    action: &str,
    entity_type: &str,
    entity_id: Option<i64>,
    old_value: &str,
    new_value: &str,
    details: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (
            operator_id, action, entity_type, entity_id,
            old_value, new_value, details, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(operator_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(old_value)
    .bind(new_value)
    .bind(details)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

/// Read-side queries over the audit trail.
#[derive(Debug, Clone)]
pub struct AuditLog {
    db: Database,
}

impl AuditLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn entity_history(
        &self,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM audit_log
            WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY created_at
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_entry).collect()
    }

    pub async fn operator_activity(&self, operator_id: i64, days: i64) -> Result<Vec<AuditEntry>> {
        let since = Utc::now() - Duration::days(days);
        let rows = sqlx::query(
            r#"
            SELECT * FROM audit_log
            WHERE operator_id = ?1 AND created_at >= ?2
            ORDER BY created_at DESC
            "#,
        )
        .bind(operator_id)
        .bind(since)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_entry).collect()
    }

    pub async fn recent(&self, hours: i64, limit: i64) -> Result<Vec<AuditEntry>> {
        let since = Utc::now() - Duration::hours(hours);
        let rows = sqlx::query(
            r#"
            SELECT * FROM audit_log
            WHERE created_at >= ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_entry).collect()
    }

    pub async fn login_history(&self, operator_id: Option<i64>, days: i64) -> Result<Vec<AuditEntry>> {
        let since = Utc::now() - Duration::days(days);
        let rows = sqlx::query(
            r#"
            SELECT * FROM audit_log
            WHERE action = ?1
              AND created_at >= ?2
              AND (?3 IS NULL OR operator_id = ?3)
            ORDER BY created_at DESC
            "#,
        )
        .bind(action::LOGIN)
        .bind(since)
        .bind(operator_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_entry).collect()
    }
}

fn row_to_entry(row: sqlx::sqlite::SqliteRow) -> Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.try_get("id")?,
        operator_id: row.try_get("operator_id")?,
        action: row.try_get("action")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        old_value: row.try_get("old_value")?,
        new_value: row.try_get("new_value")?,
        details: row.try_get("details")?,
        created_at: row.try_get("created_at")?,
    })
}
