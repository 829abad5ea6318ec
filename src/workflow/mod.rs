//! The work order state machine.
//!
//! Every mutation runs inside one transaction that updates the order row
//! (version-checked), appends exactly one process record, and appends the
//! audit entry. Either all three commit or none do.

pub mod transitions;

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::info;

use crate::audit::{self, action};
use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::ident;
use crate::models::{
    ItemType, MachineCategory, ProcessRecord, WorkOrder, WorkOrderStatus, Zone,
};
use crate::session::Session;

/// Command/query API over work orders.
#[derive(Debug, Clone)]
pub struct WorkOrderEngine {
    db: Database,
}

impl WorkOrderEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Intake: register one physical item in the dirty zone.
    pub async fn create_work_order(
        &self,
        session: &Session,
        item_type: ItemType,
        item_id: i64,
        item_name: &str,
        item_barcode: &str,
        department_id: Option<i64>,
        priority: i64,
        notes: &str,
    ) -> Result<WorkOrder> {
        session.ensure_active()?;
        session.authorize_zone(Zone::Dirty)?;
        if !item_barcode.is_empty() {
            ident::validate_scan_code(item_barcode)?;
        }

        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let date_prefix = format!("WO{}%", now.format("%Y%m%d"));
        let seq: i64 = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM work_orders WHERE order_number LIKE ?1",
        )
        .bind(&date_prefix)
        .fetch_one(&mut *tx)
        .await?
        .try_get::<i64, _>("cnt")?
            + 1;
        let order_number = ident::order_number(now, seq);
        let barcode = ident::new_barcode();

        let result = sqlx::query(
            r#"
            INSERT INTO work_orders (
                order_number, barcode, item_type, item_id, item_name, item_barcode,
                department_id, priority, status, current_zone, received_by,
                received_at, notes, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, ?12, ?12)
            "#,
        )
        .bind(&order_number)
        .bind(&barcode)
        .bind(item_type.as_str())
        .bind(item_id)
        .bind(item_name)
        .bind(item_barcode)
        .bind(department_id)
        .bind(priority)
        .bind(WorkOrderStatus::Received.as_str())
        .bind(Zone::Dirty.as_str())
        .bind(session.operator_id)
        .bind(now)
        .bind(notes)
        .execute(&mut *tx)
        .await
        .map_err(|e| EngineError::unique_conflict("work_orders", 0, e))?;
        let order_id = result.last_insert_rowid();

        insert_process_record(
            &mut tx,
            order_id,
            "RECEIVE",
            Zone::Dirty,
            session.operator_id,
            None,
            None,
            notes,
        )
        .await?;
        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::CREATE,
            "WORK_ORDER",
            Some(order_id),
            "",
            WorkOrderStatus::Received.as_str(),
            &order_number,
        )
        .await?;
        tx.commit().await?;

        info!(order = %order_number, item = %item_name, "work order received");
        self.get(order_id).await
    }

    /// Generic gated transition. Named operations below layer their extra
    /// preconditions and side writes on top of this path.
    pub async fn advance(
        &self,
        session: &Session,
        order_id: i64,
        to: WorkOrderStatus,
        notes: &str,
    ) -> Result<WorkOrder> {
        session.ensure_active()?;
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;
        transition_in_tx(
            &mut tx,
            session,
            &order,
            to,
            to.as_str(),
            notes,
            None,
            None,
        )
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    /// Load into a RUNNING washer cycle and move to WASHING.
    pub async fn start_washing(
        &self,
        session: &Session,
        order_id: i64,
        cycle_id: i64,
    ) -> Result<WorkOrder> {
        self.start_machine_stage(
            session,
            order_id,
            cycle_id,
            MachineCategory::Washer,
            WorkOrderStatus::Washing,
            "WASH_START",
        )
        .await
    }

    pub async fn complete_washing(&self, session: &Session, order_id: i64) -> Result<WorkOrder> {
        session.ensure_active()?;
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;
        unload_open_contents(&mut tx, order_id).await?;
        transition_in_tx(
            &mut tx,
            session,
            &order,
            WorkOrderStatus::Washed,
            "WASH_COMPLETE",
            "",
            None,
            None,
        )
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    /// Physical hand-off from the dirty to the clean area; inspection starts
    /// on arrival.
    pub async fn transfer_to_clean(&self, session: &Session, order_id: i64) -> Result<WorkOrder> {
        session.ensure_active()?;
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;
        transition_in_tx(
            &mut tx,
            session,
            &order,
            WorkOrderStatus::Inspecting,
            "TRANSFER_CLEAN",
            "",
            None,
            None,
        )
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    pub async fn pass_inspection(
        &self,
        session: &Session,
        order_id: i64,
        notes: &str,
    ) -> Result<WorkOrder> {
        session.ensure_active()?;
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;
        transition_in_tx(
            &mut tx,
            session,
            &order,
            WorkOrderStatus::Packaging,
            "INSPECT_PASS",
            notes,
            None,
            None,
        )
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    pub async fn fail_inspection(
        &self,
        session: &Session,
        order_id: i64,
        reason: &str,
    ) -> Result<WorkOrder> {
        session.ensure_active()?;
        if reason.trim().is_empty() {
            return Err(EngineError::validation("inspection failure needs a reason"));
        }
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;
        transition_in_tx(
            &mut tx,
            session,
            &order,
            WorkOrderStatus::InspectionFailed,
            "INSPECT_FAIL",
            reason,
            None,
            None,
        )
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    pub async fn complete_packaging(
        &self,
        session: &Session,
        order_id: i64,
        packaging_type: &str,
    ) -> Result<WorkOrder> {
        session.ensure_active()?;
        if packaging_type.trim().is_empty() {
            return Err(EngineError::validation("packaging type is required"));
        }
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;
        transition_in_tx(
            &mut tx,
            session,
            &order,
            WorkOrderStatus::Packaged,
            "PACKAGE_COMPLETE",
            packaging_type,
            None,
            None,
        )
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    /// Load into a RUNNING sterilizer cycle and move to STERILIZING.
    pub async fn start_sterilization(
        &self,
        session: &Session,
        order_id: i64,
        cycle_id: i64,
    ) -> Result<WorkOrder> {
        self.start_machine_stage(
            session,
            order_id,
            cycle_id,
            MachineCategory::Sterilizer,
            WorkOrderStatus::Sterilizing,
            "STERILIZE_LOAD",
        )
        .await
    }

    pub async fn unload_from_sterilizer(
        &self,
        session: &Session,
        order_id: i64,
    ) -> Result<WorkOrder> {
        session.ensure_active()?;
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;
        unload_open_contents(&mut tx, order_id).await?;
        transition_in_tx(
            &mut tx,
            session,
            &order,
            WorkOrderStatus::Sterilized,
            "STERILIZE_UNLOAD",
            "",
            None,
            None,
        )
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    pub async fn mark_pending_release(
        &self,
        session: &Session,
        order_id: i64,
    ) -> Result<WorkOrder> {
        self.advance(session, order_id, WorkOrderStatus::PendingRelease, "")
            .await
    }

    pub async fn store_item(
        &self,
        session: &Session,
        order_id: i64,
        location: &str,
    ) -> Result<WorkOrder> {
        session.ensure_active()?;
        if location.trim().is_empty() {
            return Err(EngineError::validation("storage location is required"));
        }
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;
        transition_in_tx(
            &mut tx,
            session,
            &order,
            WorkOrderStatus::Stored,
            "STORE",
            location,
            None,
            None,
        )
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    /// Hand the item to its destination. Legal only from RELEASED or STORED;
    /// terminal unless recalled later at the sterilization-record layer.
    pub async fn distribute_item(
        &self,
        session: &Session,
        order_id: i64,
        destination: &str,
    ) -> Result<WorkOrder> {
        session.ensure_active()?;
        if destination.trim().is_empty() {
            return Err(EngineError::validation("destination is required"));
        }
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;
        transition_in_tx(
            &mut tx,
            session,
            &order,
            WorkOrderStatus::Distributed,
            "DISTRIBUTE",
            destination,
            None,
            None,
        )
        .await?;
        sqlx::query(
            "UPDATE work_orders SET destination_department = ?1, completed_at = ?2 WHERE id = ?3",
        )
        .bind(destination)
        .bind(now)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    /// Explicit follow-up to a sterilization-record recall: pull the physical
    /// item back. Separate from the record-level recall by design.
    pub async fn mark_recalled(
        &self,
        session: &Session,
        order_id: i64,
        reason: &str,
    ) -> Result<WorkOrder> {
        session.ensure_active()?;
        if reason.trim().is_empty() {
            return Err(EngineError::validation("recall reason is required"));
        }
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;
        transition_in_tx(
            &mut tx,
            session,
            &order,
            WorkOrderStatus::Recalled,
            "RECALL",
            reason,
            None,
            None,
        )
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    /// Send a failed item back through the pipeline. Creates a reprocessing
    /// record and resets the order into the dirty area.
    pub async fn send_to_reprocessing(
        &self,
        session: &Session,
        order_id: i64,
        reason: &str,
    ) -> Result<WorkOrder> {
        session.ensure_active()?;
        if reason.trim().is_empty() {
            return Err(EngineError::validation("reprocessing reason is required"));
        }
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;
        transition_in_tx(
            &mut tx,
            session,
            &order,
            WorkOrderStatus::Reprocessing,
            "REPROCESS",
            reason,
            None,
            None,
        )
        .await?;
        sqlx::query(
            r#"
            INSERT INTO reprocessing_records (work_order_id, reason, initiated_by, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(order_id)
        .bind(reason)
        .bind(session.operator_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    /// Re-enter the pipeline at RECEIVED after reprocessing intake.
    pub async fn resume_reprocessing(
        &self,
        session: &Session,
        order_id: i64,
    ) -> Result<WorkOrder> {
        session.ensure_active()?;
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;
        transition_in_tx(
            &mut tx,
            session,
            &order,
            WorkOrderStatus::Received,
            "RECEIVE",
            "reprocessing re-entry",
            None,
            None,
        )
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    pub async fn get(&self, order_id: i64) -> Result<WorkOrder> {
        let row = sqlx::query("SELECT * FROM work_orders WHERE id = ?1")
            .bind(order_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| EngineError::not_found("work order", order_id))?;
        row_to_work_order(row)
    }

    /// Resolve a scanned code against order or item barcodes.
    pub async fn get_by_barcode(&self, barcode: &str) -> Result<WorkOrder> {
        ident::validate_scan_code(barcode)?;
        let row = sqlx::query(
            "SELECT * FROM work_orders WHERE barcode = ?1 OR item_barcode = ?1",
        )
        .bind(barcode)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| EngineError::not_found("work order", barcode))?;
        row_to_work_order(row)
    }

    pub async fn list_by_zone(
        &self,
        zone: Zone,
        status: Option<WorkOrderStatus>,
    ) -> Result<Vec<WorkOrder>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM work_orders
            WHERE current_zone = ?1
              AND (?2 IS NULL OR status = ?2)
            ORDER BY priority DESC, created_at
            "#,
        )
        .bind(zone.as_str())
        .bind(status.map(|s| s.as_str()))
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_work_order).collect()
    }

    pub async fn list_by_status(&self, status: WorkOrderStatus) -> Result<Vec<WorkOrder>> {
        let rows = sqlx::query(
            "SELECT * FROM work_orders WHERE status = ?1 ORDER BY priority DESC, created_at",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_work_order).collect()
    }

    /// The append-only process history of one order, oldest first.
    pub async fn process_history(&self, order_id: i64) -> Result<Vec<ProcessRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM process_records WHERE work_order_id = ?1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_process_record).collect()
    }

    async fn start_machine_stage(
        &self,
        session: &Session,
        order_id: i64,
        cycle_id: i64,
        category: MachineCategory,
        to: WorkOrderStatus,
        process_type: &str,
    ) -> Result<WorkOrder> {
        session.ensure_active()?;
        let mut tx = self.db.pool().begin().await?;
        let order = fetch_for_update(&mut tx, order_id).await?;

        let cycle = sqlx::query(
            r#"
            SELECT mc.id, mc.status, mc.machine_id, m.machine_type
            FROM machine_cycles mc
            JOIN machines m ON m.id = mc.machine_id
            WHERE mc.id = ?1
            "#,
        )
        .bind(cycle_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found("machine cycle", cycle_id))?;

        let cycle_status: String = cycle.try_get("status")?;
        if cycle_status != "RUNNING" {
            return Err(EngineError::invalid_state(format!(
                "cycle {cycle_id} is {cycle_status}, not RUNNING"
            )));
        }
        let machine_type: crate::models::MachineType =
            cycle.try_get::<String, _>("machine_type")?.parse()?;
        if machine_type.category() != category {
            return Err(EngineError::invalid_state(format!(
                "machine type {machine_type} cannot run a {process_type} stage"
            )));
        }
        let machine_id: i64 = cycle.try_get("machine_id")?;

        // An order still sitting in another open load may not be loaded again.
        let open_loads: i64 = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM cycle_contents WHERE work_order_id = ?1 AND unloaded_at IS NULL",
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("cnt")?;
        if open_loads > 0 {
            return Err(EngineError::Conflict {
                entity: "cycle_contents",
                id: order_id,
            });
        }

        sqlx::query(
            "INSERT INTO cycle_contents (cycle_id, work_order_id, loaded_at) VALUES (?1, ?2, ?3)",
        )
        .bind(cycle_id)
        .bind(order_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        transition_in_tx(
            &mut tx,
            session,
            &order,
            to,
            process_type,
            "",
            Some(machine_id),
            Some(cycle_id),
        )
        .await?;
        tx.commit().await?;
        self.get(order_id).await
    }
}

/// Apply one gated transition on an open transaction: legality check, zone
/// authorization, version-checked row update, one process record.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn transition_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    session: &Session,
    order: &WorkOrder,
    to: WorkOrderStatus,
    process_type: &str,
    notes: &str,
    machine_id: Option<i64>,
    cycle_id: Option<i64>,
) -> Result<()> {
    if !transitions::is_legal(order.status, to) {
        return Err(EngineError::InvalidTransition {
            from: order.status.to_string(),
            to: to.to_string(),
        });
    }
    let new_zone = transitions::zone_of(to);
    session.authorize_zone(new_zone)?;

    let updated = sqlx::query(
        r#"
        UPDATE work_orders
        SET status = ?1, current_zone = ?2, version = version + 1, updated_at = ?3
        WHERE id = ?4 AND version = ?5
        "#,
    )
    .bind(to.as_str())
    .bind(new_zone.as_str())
    .bind(Utc::now())
    .bind(order.id)
    .bind(order.version)
    .execute(&mut **tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(EngineError::Conflict {
            entity: "work_orders",
            id: order.id,
        });
    }

    insert_process_record(
        tx,
        order.id,
        process_type,
        new_zone,
        session.operator_id,
        machine_id,
        cycle_id,
        notes,
    )
    .await?;
    audit::append(
        &mut *tx,
        Some(session.operator_id),
        action::UPDATE,
        "WORK_ORDER",
        Some(order.id),
        order.status.as_str(),
        to.as_str(),
        process_type,
    )
    .await?;

    info!(
        order = %order.order_number,
        from = %order.status,
        to = %to,
        zone = %new_zone,
        operator = session.operator_id,
        "work order transition"
    );
    Ok(())
}

/// Status cascade used by the release authority inside its own transaction.
pub(crate) async fn cascade_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    session: &Session,
    order_id: i64,
    to: WorkOrderStatus,
    process_type: &str,
    notes: &str,
) -> Result<()> {
    let order = fetch_for_update(tx, order_id).await?;
    transition_in_tx(tx, session, &order, to, process_type, notes, None, None).await
}

pub(crate) async fn fetch_for_update(
    tx: &mut Transaction<'_, Sqlite>,
    order_id: i64,
) -> Result<WorkOrder> {
    let row = sqlx::query("SELECT * FROM work_orders WHERE id = ?1")
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| EngineError::not_found("work order", order_id))?;
    row_to_work_order(row)
}

#[allow(clippy::too_many_arguments)]
async fn insert_process_record(
    tx: &mut Transaction<'_, Sqlite>,
    order_id: i64,
    process_type: &str,
    zone: Zone,
    operator_id: i64,
    machine_id: Option<i64>,
    cycle_id: Option<i64>,
    notes: &str,
) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO process_records (
            work_order_id, process_type, zone, operator_id,
            machine_id, cycle_id, start_time, notes, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?7)
        "#,
    )
    .bind(order_id)
    .bind(process_type)
    .bind(zone.as_str())
    .bind(operator_id)
    .bind(machine_id)
    .bind(cycle_id)
    .bind(now)
    .bind(notes)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn unload_open_contents(tx: &mut Transaction<'_, Sqlite>, order_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE cycle_contents SET unloaded_at = ?1 WHERE work_order_id = ?2 AND unloaded_at IS NULL",
    )
    .bind(Utc::now())
    .bind(order_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) fn row_to_work_order(row: SqliteRow) -> Result<WorkOrder> {
    Ok(WorkOrder {
        id: row.try_get("id")?,
        order_number: row.try_get("order_number")?,
        barcode: row.try_get("barcode")?,
        item_type: row.try_get::<String, _>("item_type")?.parse()?,
        item_id: row.try_get("item_id")?,
        item_name: row.try_get("item_name")?,
        item_barcode: row.try_get("item_barcode")?,
        department_id: row.try_get("department_id")?,
        priority: row.try_get("priority")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        current_zone: row.try_get::<String, _>("current_zone")?.parse()?,
        source_department: row.try_get("source_department")?,
        destination_department: row.try_get("destination_department")?,
        received_by: row.try_get("received_by")?,
        received_at: row.try_get("received_at")?,
        completed_at: row.try_get("completed_at")?,
        notes: row.try_get("notes")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_process_record(row: SqliteRow) -> Result<ProcessRecord> {
    Ok(ProcessRecord {
        id: row.try_get("id")?,
        work_order_id: row.try_get("work_order_id")?,
        process_type: row.try_get("process_type")?,
        zone: row.try_get::<String, _>("zone")?.parse()?,
        operator_id: row.try_get("operator_id")?,
        machine_id: row.try_get("machine_id")?,
        cycle_id: row.try_get("cycle_id")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
    })
}
