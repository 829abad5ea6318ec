//! Machine and cycle tracking.
//!
//! A machine runs at most one cycle at a time. Cycle rows are immutable once
//! COMPLETED or ERROR; the live cycle id is cached on the machine row and
//! cleared when the cycle settles.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::{info, warn};

use crate::audit::{self, action};
use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::ident;
use crate::models::{
    IndicatorResult, Machine, MachineCategory, MachineCycle, MachineProgram, MachineStatus, Zone,
};
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct CycleTracker {
    db: Database,
}

impl CycleTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn register_machine(
        &self,
        session: &Session,
        name: &str,
        machine_type: crate::models::MachineType,
        zone: Zone,
        manufacturer: &str,
        model: &str,
        serial_number: &str,
    ) -> Result<Machine> {
        session.ensure_active()?;
        if name.trim().is_empty() {
            return Err(EngineError::validation("machine name is required"));
        }
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO machines (
                name, machine_type, manufacturer, model, serial_number,
                zone, status, total_cycles, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'IDLE', 0, 1, ?7, ?7)
            "#,
        )
        .bind(name)
        .bind(machine_type.as_str())
        .bind(manufacturer)
        .bind(model)
        .bind(serial_number)
        .bind(zone.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let machine_id = result.last_insert_rowid();
        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::CREATE,
            "MACHINE",
            Some(machine_id),
            "",
            machine_type.as_str(),
            name,
        )
        .await?;
        tx.commit().await?;
        self.machine(machine_id).await
    }

    pub async fn add_program(
        &self,
        session: &Session,
        machine_id: i64,
        name: &str,
        code: &str,
        temperature: f64,
        pressure: f64,
        duration_minutes: i64,
    ) -> Result<MachineProgram> {
        session.ensure_active()?;
        // ensure the machine exists before attaching a program
        self.machine(machine_id).await?;
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO machine_programs (
                machine_id, name, code, temperature, pressure,
                duration_minutes, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
            "#,
        )
        .bind(machine_id)
        .bind(name)
        .bind(code)
        .bind(temperature)
        .bind(pressure)
        .bind(duration_minutes)
        .bind(now)
        .execute(self.db.pool())
        .await?;
        self.program(result.last_insert_rowid()).await
    }

    /// Start a cycle on an idle machine. The machine row flips to RUNNING
    /// and caches the cycle id in the same transaction.
    pub async fn start_cycle(
        &self,
        session: &Session,
        machine_id: i64,
        program_id: Option<i64>,
        notes: &str,
    ) -> Result<MachineCycle> {
        session.ensure_active()?;
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let machine = fetch_machine(&mut tx, machine_id).await?;
        session.authorize_zone(machine.zone)?;
        if !machine.is_available() {
            return Err(EngineError::invalid_state(format!(
                "machine {} is {}, not available",
                machine.name, machine.status
            )));
        }

        let prefix = format!("C{}M{:02}%", now.format("%Y%m%d"), machine_id);
        let seq: i64 = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM machine_cycles WHERE cycle_number LIKE ?1",
        )
        .bind(&prefix)
        .fetch_one(&mut *tx)
        .await?
        .try_get::<i64, _>("cnt")?
            + 1;
        let cycle_number = ident::cycle_number(now, machine_id, seq);

        let result = sqlx::query(
            r#"
            INSERT INTO machine_cycles (
                cycle_number, machine_id, program_id, operator_id,
                start_time, status, notes, version, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'RUNNING', ?6, 0, ?5)
            "#,
        )
        .bind(&cycle_number)
        .bind(machine_id)
        .bind(program_id)
        .bind(session.operator_id)
        .bind(now)
        .bind(notes)
        .execute(&mut *tx)
        .await
        .map_err(|e| EngineError::unique_conflict("machine_cycles", machine_id, e))?;
        let cycle_id = result.last_insert_rowid();

        sqlx::query(
            "UPDATE machines SET status = 'RUNNING', current_cycle_id = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(cycle_id)
        .bind(now)
        .bind(machine_id)
        .execute(&mut *tx)
        .await?;

        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::CREATE,
            "MACHINE_CYCLE",
            Some(cycle_id),
            "",
            "RUNNING",
            &cycle_number,
        )
        .await?;
        tx.commit().await?;

        info!(machine = %machine.name, cycle = %cycle_number, "cycle started");
        self.cycle(cycle_id).await
    }

    /// Finish a running cycle with achieved parameters and the cycle-level
    /// chemical indicator read. The machine returns to IDLE and its lifetime
    /// counter advances.
    pub async fn complete_cycle(
        &self,
        session: &Session,
        cycle_id: i64,
        temperature_achieved: f64,
        pressure_achieved: f64,
        ci_result: IndicatorResult,
    ) -> Result<MachineCycle> {
        session.ensure_active()?;
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let cycle = fetch_cycle(&mut tx, cycle_id).await?;
        if !cycle.is_running() {
            return Err(EngineError::invalid_state(format!(
                "cycle {} is {}, not RUNNING",
                cycle.cycle_number, cycle.status
            )));
        }

        let updated = sqlx::query(
            r#"
            UPDATE machine_cycles
            SET status = 'COMPLETED', end_time = ?1,
                temperature_achieved = ?2, pressure_achieved = ?3,
                ci_result = ?4, version = version + 1
            WHERE id = ?5 AND version = ?6
            "#,
        )
        .bind(now)
        .bind(temperature_achieved)
        .bind(pressure_achieved)
        .bind(ci_result.as_str())
        .bind(cycle_id)
        .bind(cycle.version)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(EngineError::Conflict {
                entity: "machine_cycles",
                id: cycle_id,
            });
        }

        sqlx::query(
            r#"
            UPDATE machines
            SET status = 'IDLE', current_cycle_id = NULL,
                total_cycles = total_cycles + 1, updated_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(now)
        .bind(cycle.machine_id)
        .execute(&mut *tx)
        .await?;

        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::UPDATE,
            "MACHINE_CYCLE",
            Some(cycle_id),
            "RUNNING",
            "COMPLETED",
            &cycle.cycle_number,
        )
        .await?;
        tx.commit().await?;

        info!(cycle = %cycle.cycle_number, "cycle completed");
        self.cycle(cycle_id).await
    }

    /// Abort a running cycle. Both the cycle and the machine go to ERROR;
    /// the machine stays there until [`recover_machine`](Self::recover_machine)
    /// is called after a physical check.
    pub async fn abort_cycle(
        &self,
        session: &Session,
        cycle_id: i64,
        reason: &str,
    ) -> Result<MachineCycle> {
        session.ensure_active()?;
        if reason.trim().is_empty() {
            return Err(EngineError::validation("abort reason is required"));
        }
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let cycle = fetch_cycle(&mut tx, cycle_id).await?;
        if !cycle.is_running() {
            return Err(EngineError::invalid_state(format!(
                "cycle {} is {}, not RUNNING",
                cycle.cycle_number, cycle.status
            )));
        }

        let updated = sqlx::query(
            r#"
            UPDATE machine_cycles
            SET status = 'ERROR', end_time = ?1, notes = ?2, version = version + 1
            WHERE id = ?3 AND version = ?4
            "#,
        )
        .bind(now)
        .bind(reason)
        .bind(cycle_id)
        .bind(cycle.version)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(EngineError::Conflict {
                entity: "machine_cycles",
                id: cycle_id,
            });
        }

        sqlx::query(
            "UPDATE machines SET status = 'ERROR', current_cycle_id = NULL, updated_at = ?1 WHERE id = ?2",
        )
        .bind(now)
        .bind(cycle.machine_id)
        .execute(&mut *tx)
        .await?;

        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::UPDATE,
            "MACHINE_CYCLE",
            Some(cycle_id),
            "RUNNING",
            "ERROR",
            reason,
        )
        .await?;
        tx.commit().await?;

        warn!(cycle = %cycle.cycle_number, reason, "cycle aborted");
        self.cycle(cycle_id).await
    }

    /// Manual reset of a machine stuck in ERROR after the fault is cleared.
    pub async fn recover_machine(&self, session: &Session, machine_id: i64) -> Result<Machine> {
        session.ensure_active()?;
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let machine = fetch_machine(&mut tx, machine_id).await?;
        if machine.status != MachineStatus::Error {
            return Err(EngineError::invalid_state(format!(
                "machine {} is {}, not ERROR",
                machine.name, machine.status
            )));
        }

        sqlx::query("UPDATE machines SET status = 'IDLE', updated_at = ?1 WHERE id = ?2")
            .bind(now)
            .bind(machine_id)
            .execute(&mut *tx)
            .await?;
        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::UPDATE,
            "MACHINE",
            Some(machine_id),
            "ERROR",
            "IDLE",
            "manual recovery",
        )
        .await?;
        tx.commit().await?;

        info!(machine = %machine.name, "machine recovered");
        self.machine(machine_id).await
    }

    pub async fn machine(&self, machine_id: i64) -> Result<Machine> {
        let row = sqlx::query("SELECT * FROM machines WHERE id = ?1")
            .bind(machine_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| EngineError::not_found("machine", machine_id))?;
        row_to_machine(row)
    }

    pub async fn cycle(&self, cycle_id: i64) -> Result<MachineCycle> {
        let row = sqlx::query("SELECT * FROM machine_cycles WHERE id = ?1")
            .bind(cycle_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| EngineError::not_found("machine cycle", cycle_id))?;
        row_to_cycle(row)
    }

    pub async fn program(&self, program_id: i64) -> Result<MachineProgram> {
        let row = sqlx::query("SELECT * FROM machine_programs WHERE id = ?1")
            .bind(program_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| EngineError::not_found("machine program", program_id))?;
        row_to_program(row)
    }

    pub async fn machines_in_zone(&self, zone: Zone) -> Result<Vec<Machine>> {
        let rows = sqlx::query(
            "SELECT * FROM machines WHERE zone = ?1 AND is_active = 1 ORDER BY name",
        )
        .bind(zone.as_str())
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_machine).collect()
    }

    pub async fn available_machines(&self, category: MachineCategory) -> Result<Vec<Machine>> {
        let rows = sqlx::query(
            "SELECT * FROM machines WHERE status = 'IDLE' AND is_active = 1 ORDER BY name",
        )
        .fetch_all(self.db.pool())
        .await?;
        let machines: Result<Vec<Machine>> = rows.into_iter().map(row_to_machine).collect();
        Ok(machines?
            .into_iter()
            .filter(|m| m.category() == category)
            .collect())
    }

    pub async fn active_cycles(&self) -> Result<Vec<MachineCycle>> {
        let rows = sqlx::query(
            "SELECT * FROM machine_cycles WHERE status = 'RUNNING' ORDER BY start_time",
        )
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_cycle).collect()
    }

    pub async fn recent_cycles(&self, machine_id: i64, limit: i64) -> Result<Vec<MachineCycle>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM machine_cycles
            WHERE machine_id = ?1
            ORDER BY start_time DESC
            LIMIT ?2
            "#,
        )
        .bind(machine_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_cycle).collect()
    }

    /// Work order ids currently loaded in a cycle (not yet unloaded).
    pub async fn cycle_contents(&self, cycle_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT work_order_id FROM cycle_contents
            WHERE cycle_id = ?1 AND unloaded_at IS NULL
            ORDER BY loaded_at
            "#,
        )
        .bind(cycle_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter()
            .map(|r| r.try_get("work_order_id").map_err(EngineError::from))
            .collect()
    }
}

async fn fetch_machine(tx: &mut Transaction<'_, Sqlite>, machine_id: i64) -> Result<Machine> {
    let row = sqlx::query("SELECT * FROM machines WHERE id = ?1")
        .bind(machine_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| EngineError::not_found("machine", machine_id))?;
    row_to_machine(row)
}

async fn fetch_cycle(tx: &mut Transaction<'_, Sqlite>, cycle_id: i64) -> Result<MachineCycle> {
    let row = sqlx::query("SELECT * FROM machine_cycles WHERE id = ?1")
        .bind(cycle_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| EngineError::not_found("machine cycle", cycle_id))?;
    row_to_cycle(row)
}

fn row_to_machine(row: SqliteRow) -> Result<Machine> {
    Ok(Machine {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        machine_type: row.try_get::<String, _>("machine_type")?.parse()?,
        manufacturer: row.try_get("manufacturer")?,
        model: row.try_get("model")?,
        serial_number: row.try_get("serial_number")?,
        zone: row.try_get::<String, _>("zone")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        current_cycle_id: row.try_get("current_cycle_id")?,
        total_cycles: row.try_get("total_cycles")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_cycle(row: SqliteRow) -> Result<MachineCycle> {
    Ok(MachineCycle {
        id: row.try_get("id")?,
        cycle_number: row.try_get("cycle_number")?,
        machine_id: row.try_get("machine_id")?,
        program_id: row.try_get("program_id")?,
        operator_id: row.try_get("operator_id")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        temperature_achieved: row.try_get("temperature_achieved")?,
        pressure_achieved: row.try_get("pressure_achieved")?,
        ci_result: row.try_get::<String, _>("ci_result")?.parse()?,
        notes: row.try_get("notes")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_program(row: SqliteRow) -> Result<MachineProgram> {
    Ok(MachineProgram {
        id: row.try_get("id")?,
        machine_id: row.try_get("machine_id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        temperature: row.try_get("temperature")?,
        pressure: row.try_get("pressure")?,
        duration_minutes: row.try_get("duration_minutes")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}
