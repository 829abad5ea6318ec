//! Sterility certificates and their gated lifecycle.
//!
//! A [`SterilizationRecord`](crate::models::SterilizationRecord) tracks one
//! work order through one sterilizer cycle: chemical indicator check,
//! biological indicator incubation and read, then supervised release or
//! rejection. Each stage is a hard gate; no stage can be skipped and no
//! settled record can be re-decided.

pub mod indicators;
pub mod records;
pub mod release;

pub use indicators::IndicatorEngine;
pub use records::SterilizationRecords;
pub use release::ReleaseAuthority;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, Transaction};

use crate::error::{EngineError, Result};
use crate::models::SterilizationRecord;

pub(crate) async fn fetch_record_for_update(
    tx: &mut Transaction<'_, Sqlite>,
    record_id: i64,
) -> Result<SterilizationRecord> {
    let row = sqlx::query("SELECT * FROM sterilization_records WHERE id = ?1")
        .bind(record_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| EngineError::not_found("sterilization record", record_id))?;
    row_to_record(row)
}

/// Append one entry to the per-record release trail.
pub(crate) async fn append_release_log(
    conn: &mut SqliteConnection,
    sterilization_id: i64,
    action: &str,
    performed_by: Option<i64>,
    notes: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sterilization_release_log (
            sterilization_id, action, performed_by, notes, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(sterilization_id)
    .bind(action)
    .bind(performed_by)
    .bind(notes)
    .bind(chrono::Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) fn row_to_record(row: SqliteRow) -> Result<SterilizationRecord> {
    Ok(SterilizationRecord {
        id: row.try_get("id")?,
        record_number: row.try_get("record_number")?,
        work_order_id: row.try_get("work_order_id")?,
        cycle_id: row.try_get("cycle_id")?,
        machine_id: row.try_get("machine_id")?,
        sterilization_method: row.try_get("sterilization_method")?,
        operator_id: row.try_get("operator_id")?,
        load_time: row.try_get("load_time")?,
        unload_time: row.try_get("unload_time")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        ci_result: row.try_get::<String, _>("ci_result")?.parse()?,
        ci_checked_by: row.try_get("ci_checked_by")?,
        ci_checked_at: row.try_get("ci_checked_at")?,
        bi_lot_number: row.try_get("bi_lot_number")?,
        bi_result: row.try_get::<String, _>("bi_result")?.parse()?,
        bi_incubation_start: row.try_get("bi_incubation_start")?,
        bi_read_by: row.try_get("bi_read_by")?,
        bi_read_at: row.try_get("bi_read_at")?,
        released_by: row.try_get("released_by")?,
        released_at: row.try_get("released_at")?,
        rejected_by: row.try_get("rejected_by")?,
        rejected_at: row.try_get("rejected_at")?,
        rejection_reason: row.try_get("rejection_reason")?,
        expiry_date: row.try_get("expiry_date")?,
        storage_location: row.try_get("storage_location")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
