//! Creation and bookkeeping of sterilization records.

use chrono::{Duration, Utc};
use sqlx::Row;
use tracing::info;

use super::row_to_record;
use crate::audit::{self, action};
use crate::config::SterilizationConfig;
use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::ident;
use crate::models::{SterilizationRecord, SterilizationStatus};
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct SterilizationRecords {
    db: Database,
    policy: SterilizationConfig,
}

impl SterilizationRecords {
    pub fn new(db: Database, policy: SterilizationConfig) -> Self {
        Self { db, policy }
    }

    /// Open a record for one work order loaded into a sterilizer cycle.
    ///
    /// The expiry date is fixed here, from the method's validity window and
    /// the load time; later events never move it.
    pub async fn create_record(
        &self,
        session: &Session,
        work_order_id: i64,
        cycle_id: i64,
    ) -> Result<SterilizationRecord> {
        session.ensure_active()?;
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let cycle = sqlx::query(
            r#"
            SELECT mc.machine_id, mc.start_time, m.machine_type
            FROM machine_cycles mc
            JOIN machines m ON m.id = mc.machine_id
            WHERE mc.id = ?1
            "#,
        )
        .bind(cycle_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found("machine cycle", cycle_id))?;
        let machine_id: i64 = cycle.try_get("machine_id")?;
        let load_time: chrono::DateTime<Utc> = cycle.try_get("start_time")?;
        let method: String = cycle.try_get("machine_type")?;

        let existing: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS cnt FROM sterilization_records
            WHERE work_order_id = ?1 AND status IN ('PENDING_CI', 'PENDING_BI', 'PENDING_RELEASE')
            "#,
        )
        .bind(work_order_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("cnt")?;
        if existing > 0 {
            return Err(EngineError::Conflict {
                entity: "sterilization_records",
                id: work_order_id,
            });
        }

        let prefix = format!("SR{}%", now.format("%Y%m%d"));
        let seq: i64 = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM sterilization_records WHERE record_number LIKE ?1",
        )
        .bind(&prefix)
        .fetch_one(&mut *tx)
        .await?
        .try_get::<i64, _>("cnt")?
            + 1;
        let record_number = ident::record_number(now, seq);
        let expiry = load_time + Duration::days(self.policy.validity_days(&method));

        let result = sqlx::query(
            r#"
            INSERT INTO sterilization_records (
                record_number, work_order_id, cycle_id, machine_id,
                sterilization_method, operator_id, load_time, status,
                expiry_date, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'PENDING_CI', ?8, 0, ?9, ?9)
            "#,
        )
        .bind(&record_number)
        .bind(work_order_id)
        .bind(cycle_id)
        .bind(machine_id)
        .bind(&method)
        .bind(session.operator_id)
        .bind(load_time)
        .bind(expiry)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| EngineError::unique_conflict("sterilization_records", work_order_id, e))?;
        let record_id = result.last_insert_rowid();

        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::CREATE,
            "STERILIZATION_RECORD",
            Some(record_id),
            "",
            SterilizationStatus::PendingCi.as_str(),
            &record_number,
        )
        .await?;
        tx.commit().await?;

        info!(record = %record_number, method = %method, "sterilization record opened");
        self.get(record_id).await
    }

    pub async fn set_unload_time(&self, session: &Session, record_id: i64) -> Result<()> {
        session.ensure_active()?;
        let updated = sqlx::query(
            r#"
            UPDATE sterilization_records
            SET unload_time = ?1, updated_at = ?1
            WHERE id = ?2 AND unload_time IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(record_id)
        .execute(self.db.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(EngineError::invalid_state(format!(
                "record {record_id} is missing or already unloaded"
            )));
        }
        Ok(())
    }

    pub async fn get(&self, record_id: i64) -> Result<SterilizationRecord> {
        let row = sqlx::query("SELECT * FROM sterilization_records WHERE id = ?1")
            .bind(record_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| EngineError::not_found("sterilization record", record_id))?;
        row_to_record(row)
    }

    pub async fn by_status(&self, status: SterilizationStatus) -> Result<Vec<SterilizationRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM sterilization_records WHERE status = ?1 ORDER BY load_time",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn by_cycle(&self, cycle_id: i64) -> Result<Vec<SterilizationRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM sterilization_records WHERE cycle_id = ?1 ORDER BY id",
        )
        .bind(cycle_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    /// Latest record for the work order behind a scanned barcode.
    pub async fn by_order_barcode(&self, barcode: &str) -> Result<SterilizationRecord> {
        ident::validate_scan_code(barcode)?;
        let row = sqlx::query(
            r#"
            SELECT sr.* FROM sterilization_records sr
            JOIN work_orders wo ON wo.id = sr.work_order_id
            WHERE wo.barcode = ?1 OR wo.item_barcode = ?1
            ORDER BY sr.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(barcode)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| EngineError::not_found("sterilization record", barcode))?;
        row_to_record(row)
    }

    /// Released stock whose expiry falls within the next `days` days.
    pub async fn expiring_within(&self, days: i64) -> Result<Vec<SterilizationRecord>> {
        let horizon = Utc::now() + Duration::days(days);
        let rows = sqlx::query(
            r#"
            SELECT * FROM sterilization_records
            WHERE status = 'RELEASED' AND expiry_date <= ?1
            ORDER BY expiry_date
            "#,
        )
        .bind(horizon)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    /// Sweep released stock past its expiry date into EXPIRED. Returns the
    /// ids that changed.
    pub async fn expire_overdue(&self, session: &Session) -> Result<Vec<i64>> {
        session.ensure_active()?;
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;
        let rows = sqlx::query(
            "SELECT id FROM sterilization_records WHERE status = 'RELEASED' AND expiry_date < ?1",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        let mut expired = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            sqlx::query(
                r#"
                UPDATE sterilization_records
                SET status = 'EXPIRED', version = version + 1, updated_at = ?1
                WHERE id = ?2
                "#,
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            audit::append(
                &mut tx,
                Some(session.operator_id),
                action::UPDATE,
                "STERILIZATION_RECORD",
                Some(id),
                "RELEASED",
                "EXPIRED",
                "expiry sweep",
            )
            .await?;
            expired.push(id);
        }
        tx.commit().await?;
        Ok(expired)
    }
}
