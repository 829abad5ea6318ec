use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Zone;
use crate::error::UnknownTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Supervisor,
    Operator,
    Nurse,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Supervisor => "SUPERVISOR",
            Role::Operator => "OPERATOR",
            Role::Nurse => "NURSE",
            Role::Viewer => "VIEWER",
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Role::Admin => 100,
            Role::Supervisor => 80,
            Role::Operator => 50,
            Role::Nurse => 40,
            Role::Viewer => 10,
        }
    }

    /// Admin and supervisor roles may act in any zone.
    pub fn bypasses_zone_check(&self) -> bool {
        matches!(self, Role::Admin | Role::Supervisor)
    }
}

impl FromStr for Role {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "SUPERVISOR" => Ok(Role::Supervisor),
            "OPERATOR" => Ok(Role::Operator),
            "NURSE" => Ok(Role::Nurse),
            "VIEWER" => Ok(Role::Viewer),
            other => Err(UnknownTag {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A principal who scans in at a workstation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: i64,
    pub badge_number: String,
    pub full_name: String,
    pub role: Role,
    pub default_zone: Zone,
    pub can_approve_sterilization: bool,
    pub can_release_load: bool,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub failed_attempts: i64,
    pub locked_until: Option<DateTime<Utc>>,
}

impl Operator {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        match self.locked_until {
            Some(until) => now < until,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn operator(locked_until: Option<DateTime<Utc>>) -> Operator {
        Operator {
            id: 1,
            badge_number: "OP-1".into(),
            full_name: "Test Operator".into(),
            role: Role::Operator,
            default_zone: Zone::Dirty,
            can_approve_sterilization: false,
            can_release_load: false,
            is_active: true,
            last_login: None,
            failed_attempts: 0,
            locked_until,
        }
    }

    #[test]
    fn lock_holds_until_the_deadline_passes() {
        let now = Utc::now();
        assert!(!operator(None).is_locked(now));
        assert!(operator(Some(now + Duration::minutes(5))).is_locked(now));
        assert!(!operator(Some(now - Duration::minutes(5))).is_locked(now));
    }
}
