pub mod machine;
pub mod operator;
pub mod sterilization;
pub mod work_order;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownTag;

pub use machine::{Machine, MachineCategory, MachineCycle, MachineProgram, MachineStatus, MachineType};
pub use operator::{Operator, Role};
pub use sterilization::{
    IndicatorResult, ReleaseLogEntry, SterilizationRecord, SterilizationStatus,
};
pub use work_order::{ProcessRecord, WorkOrder, WorkOrderStatus};

/// Physical workflow areas of the department.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Zone {
    Dirty,
    Clean,
    Sterile,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Dirty => "DIRTY",
            Zone::Clean => "CLEAN",
            Zone::Sterile => "STERILE",
        }
    }
}

impl FromStr for Zone {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DIRTY" => Ok(Zone::Dirty),
            "CLEAN" => Ok(Zone::Clean),
            "STERILE" => Ok(Zone::Sterile),
            other => Err(UnknownTag {
                kind: "zone",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of physical item a work order tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    Instrument,
    Set,
    Container,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Instrument => "INSTRUMENT",
            ItemType::Set => "SET",
            ItemType::Container => "CONTAINER",
        }
    }
}

impl FromStr for ItemType {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSTRUMENT" => Ok(ItemType::Instrument),
            "SET" => Ok(ItemType::Set),
            "CONTAINER" => Ok(ItemType::Container),
            other => Err(UnknownTag {
                kind: "item type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
