use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Zone;
use crate::error::UnknownTag;

/// Lifecycle states of a work order. Each status maps to exactly one zone;
/// see `workflow::transitions` for the successor table and zone derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkOrderStatus {
    Received,
    Washing,
    Washed,
    Inspecting,
    InspectionFailed,
    Packaging,
    Packaged,
    Sterilizing,
    Sterilized,
    PendingRelease,
    Released,
    Rejected,
    Stored,
    Distributed,
    Reprocessing,
    Recalled,
    Completed,
}

impl WorkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Received => "RECEIVED",
            WorkOrderStatus::Washing => "WASHING",
            WorkOrderStatus::Washed => "WASHED",
            WorkOrderStatus::Inspecting => "INSPECTING",
            WorkOrderStatus::InspectionFailed => "INSPECTION_FAILED",
            WorkOrderStatus::Packaging => "PACKAGING",
            WorkOrderStatus::Packaged => "PACKAGED",
            WorkOrderStatus::Sterilizing => "STERILIZING",
            WorkOrderStatus::Sterilized => "STERILIZED",
            WorkOrderStatus::PendingRelease => "PENDING_RELEASE",
            WorkOrderStatus::Released => "RELEASED",
            WorkOrderStatus::Rejected => "REJECTED",
            WorkOrderStatus::Stored => "STORED",
            WorkOrderStatus::Distributed => "DISTRIBUTED",
            WorkOrderStatus::Reprocessing => "REPROCESSING",
            WorkOrderStatus::Recalled => "RECALLED",
            WorkOrderStatus::Completed => "COMPLETED",
        }
    }

    pub const ALL: [WorkOrderStatus; 17] = [
        WorkOrderStatus::Received,
        WorkOrderStatus::Washing,
        WorkOrderStatus::Washed,
        WorkOrderStatus::Inspecting,
        WorkOrderStatus::InspectionFailed,
        WorkOrderStatus::Packaging,
        WorkOrderStatus::Packaged,
        WorkOrderStatus::Sterilizing,
        WorkOrderStatus::Sterilized,
        WorkOrderStatus::PendingRelease,
        WorkOrderStatus::Released,
        WorkOrderStatus::Rejected,
        WorkOrderStatus::Stored,
        WorkOrderStatus::Distributed,
        WorkOrderStatus::Reprocessing,
        WorkOrderStatus::Recalled,
        WorkOrderStatus::Completed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkOrderStatus::Distributed | WorkOrderStatus::Completed
        )
    }
}

impl FromStr for WorkOrderStatus {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkOrderStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownTag {
                kind: "work order status",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One physical item (instrument, set or container) in flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: i64,
    pub order_number: String,
    pub barcode: String,
    pub item_type: super::ItemType,
    pub item_id: i64,
    pub item_name: String,
    pub item_barcode: String,
    pub department_id: Option<i64>,
    pub priority: i64,
    pub status: WorkOrderStatus,
    pub current_zone: Zone,
    pub source_department: String,
    pub destination_department: String,
    pub received_by: Option<i64>,
    pub received_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkOrder {
    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn needs_reprocessing(&self) -> bool {
        matches!(
            self.status,
            WorkOrderStatus::InspectionFailed
                | WorkOrderStatus::Rejected
                | WorkOrderStatus::Reprocessing
        )
    }
}

/// Append-only history entry: one per accepted transition, never mutated
/// after end_time is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: i64,
    pub work_order_id: i64,
    pub process_type: String,
    pub zone: Zone,
    pub operator_id: Option<i64>,
    pub machine_id: Option<i64>,
    pub cycle_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}
