use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownTag;

/// Indicator pipeline states of a sterilization record. Transitions are
/// monotonic: PENDING_CI -> PENDING_BI -> PENDING_RELEASE -> RELEASED,
/// with REJECTED reachable from any indicator stage and RECALLED from
/// RELEASED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SterilizationStatus {
    PendingCi,
    PendingBi,
    PendingRelease,
    Released,
    Rejected,
    Recalled,
    Expired,
    Used,
}

impl SterilizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SterilizationStatus::PendingCi => "PENDING_CI",
            SterilizationStatus::PendingBi => "PENDING_BI",
            SterilizationStatus::PendingRelease => "PENDING_RELEASE",
            SterilizationStatus::Released => "RELEASED",
            SterilizationStatus::Rejected => "REJECTED",
            SterilizationStatus::Recalled => "RECALLED",
            SterilizationStatus::Expired => "EXPIRED",
            SterilizationStatus::Used => "USED",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            SterilizationStatus::PendingCi
                | SterilizationStatus::PendingBi
                | SterilizationStatus::PendingRelease
        )
    }
}

impl FromStr for SterilizationStatus {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_CI" => Ok(SterilizationStatus::PendingCi),
            "PENDING_BI" => Ok(SterilizationStatus::PendingBi),
            "PENDING_RELEASE" => Ok(SterilizationStatus::PendingRelease),
            "RELEASED" => Ok(SterilizationStatus::Released),
            "REJECTED" => Ok(SterilizationStatus::Rejected),
            "RECALLED" => Ok(SterilizationStatus::Recalled),
            "EXPIRED" => Ok(SterilizationStatus::Expired),
            "USED" => Ok(SterilizationStatus::Used),
            other => Err(UnknownTag {
                kind: "sterilization status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SterilizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorResult {
    Pass,
    Fail,
    Pending,
}

impl IndicatorResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorResult::Pass => "PASS",
            IndicatorResult::Fail => "FAIL",
            IndicatorResult::Pending => "PENDING",
        }
    }

    /// A recordable check outcome; PENDING is the unset default, never an
    /// input.
    pub fn is_final(&self) -> bool {
        matches!(self, IndicatorResult::Pass | IndicatorResult::Fail)
    }
}

impl FromStr for IndicatorResult {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(IndicatorResult::Pass),
            "FAIL" => Ok(IndicatorResult::Fail),
            "PENDING" => Ok(IndicatorResult::Pending),
            other => Err(UnknownTag {
                kind: "indicator result",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for IndicatorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The sterility certificate for one work order in one machine cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SterilizationRecord {
    pub id: i64,
    pub record_number: String,
    pub work_order_id: i64,
    pub cycle_id: i64,
    pub machine_id: i64,
    pub sterilization_method: String,
    pub operator_id: Option<i64>,
    pub load_time: DateTime<Utc>,
    pub unload_time: Option<DateTime<Utc>>,
    pub status: SterilizationStatus,
    pub ci_result: IndicatorResult,
    pub ci_checked_by: Option<i64>,
    pub ci_checked_at: Option<DateTime<Utc>>,
    pub bi_lot_number: String,
    pub bi_result: IndicatorResult,
    pub bi_incubation_start: Option<DateTime<Utc>>,
    pub bi_read_by: Option<i64>,
    pub bi_read_at: Option<DateTime<Utc>>,
    pub released_by: Option<i64>,
    pub released_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<i64>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: String,
    pub expiry_date: DateTime<Utc>,
    pub storage_location: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SterilizationRecord {
    pub fn indicators_passed(&self) -> bool {
        self.ci_result == IndicatorResult::Pass && self.bi_result == IndicatorResult::Pass
    }

    pub fn can_be_released(&self) -> bool {
        self.status == SterilizationStatus::PendingRelease && self.indicators_passed()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry_date
    }
}

/// Append-only audit trail scoped to one sterilization record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseLogEntry {
    pub id: i64,
    pub sterilization_id: i64,
    pub action: String,
    pub performed_by: Option<i64>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}
