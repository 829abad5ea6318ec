//! Chemical and biological indicator gates.
//!
//! CI is read at unload; BI incubates for a configured window before a
//! reader records its result. A FAIL at either gate settles the record as
//! REJECTED immediately.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use super::{append_release_log, fetch_record_for_update, row_to_record};
use crate::audit::{self, action};
use crate::config::SterilizationConfig;
use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::models::{IndicatorResult, SterilizationRecord, SterilizationStatus};
use crate::session::Session;
use crate::workflow;
use crate::models::WorkOrderStatus;

#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    db: Database,
    policy: SterilizationConfig,
}

impl IndicatorEngine {
    pub fn new(db: Database, policy: SterilizationConfig) -> Self {
        Self { db, policy }
    }

    /// Record the chemical indicator read. PASS advances to PENDING_BI;
    /// FAIL settles the record as REJECTED.
    pub async fn check_ci(
        &self,
        session: &Session,
        record_id: i64,
        result: IndicatorResult,
        notes: &str,
    ) -> Result<SterilizationRecord> {
        session.ensure_active()?;
        if !result.is_final() {
            return Err(EngineError::validation("indicator read must be PASS or FAIL"));
        }
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let record = fetch_record_for_update(&mut tx, record_id).await?;
        if record.status != SterilizationStatus::PendingCi {
            return Err(EngineError::invalid_state(format!(
                "record {} is {}, CI already decided",
                record.record_number, record.status
            )));
        }

        let next = match result {
            IndicatorResult::Pass => SterilizationStatus::PendingBi,
            _ => SterilizationStatus::Rejected,
        };
        let updated = sqlx::query(
            r#"
            UPDATE sterilization_records
            SET ci_result = ?1, ci_checked_by = ?2, ci_checked_at = ?3,
                status = ?4,
                rejected_by = CASE WHEN ?4 = 'REJECTED' THEN ?2 ELSE rejected_by END,
                rejected_at = CASE WHEN ?4 = 'REJECTED' THEN ?3 ELSE rejected_at END,
                rejection_reason = CASE WHEN ?4 = 'REJECTED' THEN ?5 ELSE rejection_reason END,
                version = version + 1, updated_at = ?3
            WHERE id = ?6 AND version = ?7
            "#,
        )
        .bind(result.as_str())
        .bind(session.operator_id)
        .bind(now)
        .bind(next.as_str())
        .bind(if notes.is_empty() { "chemical indicator failed" } else { notes })
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

        if next == SterilizationStatus::Rejected {
            append_release_log(&mut tx, record_id, "CI_FAIL", Some(session.operator_id), notes)
                .await?;
            workflow::cascade_in_tx(
                &mut tx,
                session,
                record.work_order_id,
                WorkOrderStatus::Rejected,
                "CI_FAIL",
                notes,
            )
            .await?;
            warn!(record = %record.record_number, "chemical indicator failed");
        } else {
            info!(record = %record.record_number, "chemical indicator passed");
        }

        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::UPDATE,
            "STERILIZATION_RECORD",
            Some(record_id),
            record.status.as_str(),
            next.as_str(),
            "CI read",
        )
        .await?;
        tx.commit().await?;
        self.get(record_id).await
    }

    /// Start the biological indicator incubation clock.
    pub async fn start_bi_incubation(
        &self,
        session: &Session,
        record_id: i64,
        lot_number: &str,
    ) -> Result<SterilizationRecord> {
        session.ensure_active()?;
        if lot_number.trim().is_empty() {
            return Err(EngineError::validation("BI lot number is required"));
        }
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let record = fetch_record_for_update(&mut tx, record_id).await?;
        if record.status != SterilizationStatus::PendingBi {
            return Err(EngineError::invalid_state(format!(
                "record {} is {}, not awaiting BI",
                record.record_number, record.status
            )));
        }
        if record.bi_incubation_start.is_some() {
            return Err(EngineError::invalid_state(format!(
                "record {} already has an incubation in progress",
                record.record_number
            )));
        }

        let updated = sqlx::query(
            r#"
            UPDATE sterilization_records
            SET bi_lot_number = ?1, bi_incubation_start = ?2,
                version = version + 1, updated_at = ?2
            WHERE id = ?3 AND version = ?4
            "#,
        )
        .bind(lot_number)
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
        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::UPDATE,
            "STERILIZATION_RECORD",
            Some(record_id),
            "",
            lot_number,
            "BI incubation started",
        )
        .await?;
        tx.commit().await?;

        info!(record = %record.record_number, lot = lot_number, "BI incubation started");
        self.get(record_id).await
    }

    /// Record the biological indicator read. PASS advances to
    /// PENDING_RELEASE; FAIL settles the record as REJECTED and pushes the
    /// work order to REJECTED in the same transaction.
    ///
    /// Reads before the incubation window has elapsed are allowed; only a
    /// missing incubation start is a hard error. Use
    /// [`ready_to_read`](Self::ready_to_read) to list records whose window
    /// is up.
    pub async fn read_bi_result(
        &self,
        session: &Session,
        record_id: i64,
        result: IndicatorResult,
        notes: &str,
    ) -> Result<SterilizationRecord> {
        session.ensure_active()?;
        if !session.can_approve_sterilization {
            return Err(EngineError::unauthorized(
                "operator lacks the sterilization approval grant",
            ));
        }
        if !result.is_final() {
            return Err(EngineError::validation("indicator read must be PASS or FAIL"));
        }
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let record = fetch_record_for_update(&mut tx, record_id).await?;
        if record.status != SterilizationStatus::PendingBi {
            return Err(EngineError::invalid_state(format!(
                "record {} is {}, BI already decided",
                record.record_number, record.status
            )));
        }
        if record.bi_incubation_start.is_none() {
            return Err(EngineError::invalid_state(format!(
                "record {} has no incubation in progress",
                record.record_number
            )));
        }

        let next = match result {
            IndicatorResult::Pass => SterilizationStatus::PendingRelease,
            _ => SterilizationStatus::Rejected,
        };
        let updated = sqlx::query(
            r#"
            UPDATE sterilization_records
            SET bi_result = ?1, bi_read_by = ?2, bi_read_at = ?3,
                status = ?4,
                rejected_by = CASE WHEN ?4 = 'REJECTED' THEN ?2 ELSE rejected_by END,
                rejected_at = CASE WHEN ?4 = 'REJECTED' THEN ?3 ELSE rejected_at END,
                rejection_reason = CASE WHEN ?4 = 'REJECTED' THEN ?5 ELSE rejection_reason END,
                version = version + 1, updated_at = ?3
            WHERE id = ?6 AND version = ?7
            "#,
        )
        .bind(result.as_str())
        .bind(session.operator_id)
        .bind(now)
        .bind(next.as_str())
        .bind(if notes.is_empty() { "biological indicator failed" } else { notes })
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

        if next == SterilizationStatus::Rejected {
            append_release_log(&mut tx, record_id, "BI_FAIL", Some(session.operator_id), notes)
                .await?;
            workflow::cascade_in_tx(
                &mut tx,
                session,
                record.work_order_id,
                WorkOrderStatus::Rejected,
                "BI_FAIL",
                notes,
            )
            .await?;
            warn!(record = %record.record_number, "biological indicator failed");
        } else {
            info!(record = %record.record_number, "biological indicator passed");
        }

        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::UPDATE,
            "STERILIZATION_RECORD",
            Some(record_id),
            record.status.as_str(),
            next.as_str(),
            "BI read",
        )
        .await?;
        tx.commit().await?;
        self.get(record_id).await
    }

    /// Records whose incubation window has elapsed and are awaiting a read.
    pub async fn ready_to_read(&self) -> Result<Vec<SterilizationRecord>> {
        let cutoff = Utc::now() - Duration::hours(self.policy.bi_incubation_hours);
        let rows = sqlx::query(
            r#"
            SELECT * FROM sterilization_records
            WHERE status = 'PENDING_BI'
              AND bi_incubation_start IS NOT NULL
              AND bi_incubation_start <= ?1
            ORDER BY bi_incubation_start
            "#,
        )
        .bind(cutoff)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_record).collect()
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
