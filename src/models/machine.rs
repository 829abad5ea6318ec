use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::sterilization::IndicatorResult;
use super::Zone;
use crate::error::UnknownTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineStatus {
    Idle,
    Running,
    Completed,
    Error,
    Maintenance,
    Offline,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Idle => "IDLE",
            MachineStatus::Running => "RUNNING",
            MachineStatus::Completed => "COMPLETED",
            MachineStatus::Error => "ERROR",
            MachineStatus::Maintenance => "MAINTENANCE",
            MachineStatus::Offline => "OFFLINE",
        }
    }
}

impl FromStr for MachineStatus {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(MachineStatus::Idle),
            "RUNNING" => Ok(MachineStatus::Running),
            "COMPLETED" => Ok(MachineStatus::Completed),
            "ERROR" => Ok(MachineStatus::Error),
            "MAINTENANCE" => Ok(MachineStatus::Maintenance),
            "OFFLINE" => Ok(MachineStatus::Offline),
            other => Err(UnknownTag {
                kind: "machine status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equipment families. Washing accepts WASHER-category machines,
/// sterilization accepts STERILIZER-category ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineType {
    WasherDisinfector,
    Ultrasonic,
    ManualSink,
    Steam,
    Plasma,
    Eto,
    DryHeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineCategory {
    Washer,
    Sterilizer,
}

impl MachineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineType::WasherDisinfector => "WASHER_DISINFECTOR",
            MachineType::Ultrasonic => "ULTRASONIC",
            MachineType::ManualSink => "MANUAL_SINK",
            MachineType::Steam => "STEAM",
            MachineType::Plasma => "PLASMA",
            MachineType::Eto => "ETO",
            MachineType::DryHeat => "DRY_HEAT",
        }
    }

    pub fn category(&self) -> MachineCategory {
        match self {
            MachineType::WasherDisinfector | MachineType::Ultrasonic | MachineType::ManualSink => {
                MachineCategory::Washer
            }
            MachineType::Steam | MachineType::Plasma | MachineType::Eto | MachineType::DryHeat => {
                MachineCategory::Sterilizer
            }
        }
    }
}

impl FromStr for MachineType {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WASHER_DISINFECTOR" => Ok(MachineType::WasherDisinfector),
            "ULTRASONIC" => Ok(MachineType::Ultrasonic),
            "MANUAL_SINK" => Ok(MachineType::ManualSink),
            "STEAM" => Ok(MachineType::Steam),
            "PLASMA" => Ok(MachineType::Plasma),
            "ETO" => Ok(MachineType::Eto),
            "DRY_HEAT" => Ok(MachineType::DryHeat),
            other => Err(UnknownTag {
                kind: "machine type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: i64,
    pub name: String,
    pub machine_type: MachineType,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub zone: Zone,
    pub status: MachineStatus,
    pub current_cycle_id: Option<i64>,
    pub total_cycles: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Machine {
    pub fn category(&self) -> MachineCategory {
        self.machine_type.category()
    }

    pub fn is_available(&self) -> bool {
        self.status == MachineStatus::Idle && self.is_active
    }
}

/// Nominal program parameters for a machine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineProgram {
    pub id: i64,
    pub machine_id: i64,
    pub name: String,
    pub code: String,
    pub temperature: f64,
    pub pressure: f64,
    pub duration_minutes: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One run (batch) of a washer or sterilizer. Immutable once completed
/// or aborted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineCycle {
    pub id: i64,
    pub cycle_number: String,
    pub machine_id: i64,
    pub program_id: Option<i64>,
    pub operator_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: MachineStatus,
    pub temperature_achieved: f64,
    pub pressure_achieved: f64,
    pub ci_result: IndicatorResult,
    pub notes: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl MachineCycle {
    pub fn is_running(&self) -> bool {
        self.status == MachineStatus::Running
    }

    pub fn duration_minutes(&self) -> i64 {
        match self.end_time {
            Some(end) => (end - self.start_time).num_minutes(),
            None => 0,
        }
    }
}
