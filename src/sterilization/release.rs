//! The release gate: the only path by which sterile stock reaches the shelf.
//!
//! Release requires the `can_release_load` grant on the acting session plus
//! both indicators at PASS and an unexpired record. The record update, the
//! work order cascade, the release-log entry and the audit row all commit in
//! one transaction.

use chrono::Utc;
use sqlx::Row;
use tracing::{info, warn};

use super::{append_release_log, fetch_record_for_update, row_to_record};
use crate::audit::{self, action};
use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::models::{SterilizationRecord, SterilizationStatus, WorkOrderStatus};
use crate::session::Session;
use crate::workflow;

#[derive(Debug, Clone)]
pub struct ReleaseAuthority {
    db: Database,
}

impl ReleaseAuthority {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Check the full release gate without mutating anything. Returns the
    /// blocking reason, or `None` when the record is releasable.
    pub async fn release_blocker(&self, record_id: i64) -> Result<Option<String>> {
        let record = self.get(record_id).await?;
        Ok(blocker_of(&record, Utc::now()))
    }

    /// Release a load to sterile storage.
    pub async fn release(
        &self,
        session: &Session,
        record_id: i64,
        notes: &str,
    ) -> Result<SterilizationRecord> {
        session.ensure_active()?;
        if !session.can_release_load {
            return Err(EngineError::unauthorized(
                "operator lacks the release grant",
            ));
        }
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let record = fetch_record_for_update(&mut tx, record_id).await?;
        if let Some(reason) = blocker_of(&record, now) {
            return Err(EngineError::invalid_state(reason));
        }

        let updated = sqlx::query(
            r#"
            UPDATE sterilization_records
            SET status = 'RELEASED', released_by = ?1, released_at = ?2,
                version = version + 1, updated_at = ?2
            WHERE id = ?3 AND version = ?4
            "#,
        )
        .bind(session.operator_id)
        .bind(now)
        .bind(record_id)
        .bind(record.version)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(EngineError::Conflict {
                entity: "sterilization_records",
                id: record_id,
            });
        }

        workflow::cascade_in_tx(
            &mut tx,
            session,
            record.work_order_id,
            WorkOrderStatus::Released,
            "RELEASE",
            notes,
        )
        .await?;
        append_release_log(&mut tx, record_id, "RELEASE", Some(session.operator_id), notes)
            .await?;
        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::RELEASE,
            "STERILIZATION_RECORD",
            Some(record_id),
            record.status.as_str(),
            "RELEASED",
            &record.record_number,
        )
        .await?;
        tx.commit().await?;

        info!(record = %record.record_number, operator = session.operator_id, "load released");
        self.get(record_id).await
    }

    /// Reject a pending record. Legal from any pending stage; the work
    /// order follows in the same transaction.
    pub async fn reject(
        &self,
        session: &Session,
        record_id: i64,
        reason: &str,
    ) -> Result<SterilizationRecord> {
        session.ensure_active()?;
        if reason.trim().is_empty() {
            return Err(EngineError::validation("rejection reason is required"));
        }
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let record = fetch_record_for_update(&mut tx, record_id).await?;
        if !record.status.is_pending() {
            return Err(EngineError::invalid_state(format!(
                "record {} is {}, already settled",
                record.record_number, record.status
            )));
        }

        let updated = sqlx::query(
            r#"
            UPDATE sterilization_records
            SET status = 'REJECTED', rejected_by = ?1, rejected_at = ?2,
                rejection_reason = ?3, version = version + 1, updated_at = ?2
            WHERE id = ?4 AND version = ?5
            "#,
        )
        .bind(session.operator_id)
        .bind(now)
        .bind(reason)
        .bind(record_id)
        .bind(record.version)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(EngineError::Conflict {
                entity: "sterilization_records",
                id: record_id,
            });
        }

        workflow::cascade_in_tx(
            &mut tx,
            session,
            record.work_order_id,
            WorkOrderStatus::Rejected,
            "REJECT",
            reason,
        )
        .await?;
        append_release_log(&mut tx, record_id, "REJECT", Some(session.operator_id), reason)
            .await?;
        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::REJECT,
            "STERILIZATION_RECORD",
            Some(record_id),
            record.status.as_str(),
            "REJECTED",
            reason,
        )
        .await?;
        tx.commit().await?;

        warn!(record = %record.record_number, reason, "load rejected");
        self.get(record_id).await
    }

    /// Recall a released load. The record settles as RECALLED; pulling the
    /// physical item back is a separate, explicit work-order action.
    pub async fn recall(
        &self,
        session: &Session,
        record_id: i64,
        reason: &str,
    ) -> Result<SterilizationRecord> {
        session.ensure_active()?;
        if reason.trim().is_empty() {
            return Err(EngineError::validation("recall reason is required"));
        }
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let record = fetch_record_for_update(&mut tx, record_id).await?;
        if !matches!(
            record.status,
            SterilizationStatus::Released | SterilizationStatus::Used
        ) {
            return Err(EngineError::invalid_state(format!(
                "record {} is {}, only released stock can be recalled",
                record.record_number, record.status
            )));
        }

        let updated = sqlx::query(
            r#"
            UPDATE sterilization_records
            SET status = 'RECALLED', version = version + 1, updated_at = ?1
            WHERE id = ?2 AND version = ?3
            "#,
        )
        .bind(now)
        .bind(record_id)
        .bind(record.version)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(EngineError::Conflict {
                entity: "sterilization_records",
                id: record_id,
            });
        }

        append_release_log(&mut tx, record_id, "RECALL", Some(session.operator_id), reason)
            .await?;
        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::RECALL,
            "STERILIZATION_RECORD",
            Some(record_id),
            record.status.as_str(),
            "RECALLED",
            reason,
        )
        .await?;
        tx.commit().await?;

        warn!(record = %record.record_number, reason, "load recalled");
        self.get(record_id).await
    }

    /// Record that a released item was used on a patient. Closes the
    /// sterility window.
    pub async fn mark_used(
        &self,
        session: &Session,
        record_id: i64,
        notes: &str,
    ) -> Result<SterilizationRecord> {
        session.ensure_active()?;
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let record = fetch_record_for_update(&mut tx, record_id).await?;
        if record.status != SterilizationStatus::Released {
            return Err(EngineError::invalid_state(format!(
                "record {} is {}, only released stock can be used",
                record.record_number, record.status
            )));
        }
        if record.is_expired(now) {
            return Err(EngineError::invalid_state(format!(
                "record {} expired on {}",
                record.record_number, record.expiry_date
            )));
        }

        let updated = sqlx::query(
            r#"
            UPDATE sterilization_records
            SET status = 'USED', version = version + 1, updated_at = ?1
            WHERE id = ?2 AND version = ?3
            "#,
        )
        .bind(now)
        .bind(record_id)
        .bind(record.version)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(EngineError::Conflict {
                entity: "sterilization_records",
                id: record_id,
            });
        }
        append_release_log(&mut tx, record_id, "USE", Some(session.operator_id), notes).await?;
        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::UPDATE,
            "STERILIZATION_RECORD",
            Some(record_id),
            "RELEASED",
            "USED",
            notes,
        )
        .await?;
        tx.commit().await?;
        self.get(record_id).await
    }

    /// The release trail of one record, oldest first.
    pub async fn release_log(&self, record_id: i64) -> Result<Vec<crate::models::ReleaseLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sterilization_release_log
            WHERE sterilization_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(record_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(crate::models::ReleaseLogEntry {
                    id: row.try_get("id")?,
                    sterilization_id: row.try_get("sterilization_id")?,
                    action: row.try_get("action")?,
                    performed_by: row.try_get("performed_by")?,
                    notes: row.try_get("notes")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn get(&self, record_id: i64) -> Result<SterilizationRecord> {
        let row = sqlx::query("SELECT * FROM sterilization_records WHERE id = ?1")
            .bind(record_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| EngineError::not_found("sterilization record", record_id))?;
        row_to_record(row)
    }
}

fn blocker_of(record: &SterilizationRecord, now: chrono::DateTime<Utc>) -> Option<String> {
    if record.status != SterilizationStatus::PendingRelease {
        return Some(format!(
            "record {} is {}, not awaiting release",
            record.record_number, record.status
        ));
    }
    if !record.indicators_passed() {
        return Some(format!(
            "record {} indicators are CI={} BI={}",
            record.record_number, record.ci_result, record.bi_result
        ));
    }
    if record.is_expired(now) {
        return Some(format!(
            "record {} expired on {}",
            record.record_number, record.expiry_date
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndicatorResult;
    use chrono::Duration;

    fn record(status: SterilizationStatus, ci: IndicatorResult, bi: IndicatorResult) -> SterilizationRecord {
        let now = Utc::now();
        SterilizationRecord {
            id: 1,
            record_number: "SR202501010001".into(),
            work_order_id: 1,
            cycle_id: 1,
            machine_id: 1,
            sterilization_method: "STEAM".into(),
            operator_id: Some(1),
            load_time: now,
            unload_time: None,
            status,
            ci_result: ci,
            ci_checked_by: None,
            ci_checked_at: None,
            bi_lot_number: String::new(),
            bi_result: bi,
            bi_incubation_start: None,
            bi_read_by: None,
            bi_read_at: None,
            released_by: None,
            released_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: String::new(),
            expiry_date: now + Duration::days(30),
            storage_location: String::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn release_gate_requires_pending_release_and_both_passes() {
        use IndicatorResult::*;
        use SterilizationStatus::*;
        let now = Utc::now();

        assert!(blocker_of(&record(PendingRelease, Pass, Pass), now).is_none());
        assert!(blocker_of(&record(PendingRelease, Pass, Pending), now).is_some());
        assert!(blocker_of(&record(PendingRelease, Fail, Pass), now).is_some());
        assert!(blocker_of(&record(PendingCi, Pass, Pass), now).is_some());
        assert!(blocker_of(&record(Released, Pass, Pass), now).is_some());
    }

    #[test]
    fn release_gate_blocks_expired_stock() {
        let mut rec = record(
            SterilizationStatus::PendingRelease,
            IndicatorResult::Pass,
            IndicatorResult::Pass,
        );
        rec.expiry_date = Utc::now() - Duration::days(1);
        assert!(blocker_of(&rec, Utc::now()).is_some());
    }
}
