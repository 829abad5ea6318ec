//! Identity and session handling.
//!
//! Authentication yields an explicit [`Session`] value that callers pass
//! into every engine operation; there is no ambient current-user singleton.
//! Expiry is cooperative: `ensure_active` is checked on access, never swept
//! in the background.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::Row;
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{self, action};
use crate::config::SecurityConfig;
use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::ident;
use crate::models::{Operator, Role, Zone};

/// Outcomes of the authentication boundary, distinct from engine errors so
/// the login shell can render each case.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("operator not found")]
    NotFound,
    #[error("account locked until {until}")]
    Locked { until: DateTime<Utc> },
    #[error("wrong credential")]
    WrongCredential,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Engine(EngineError::Storage(err))
    }
}

/// An authenticated principal. Carried by value into engine calls.
#[derive(Debug, Clone)]
pub struct Session {
    pub operator_id: i64,
    pub badge_number: String,
    pub full_name: String,
    pub role: Role,
    pub zone: Zone,
    pub can_approve_sterilization: bool,
    pub can_release_load: bool,
    pub login_time: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    timeout: Duration,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() - self.last_activity > self.timeout
    }

    /// Gate at the top of every engine operation.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_expired() {
            Err(EngineError::Unauthenticated)
        } else {
            Ok(())
        }
    }

    pub fn refresh(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn can_access_zone(&self, zone: Zone) -> bool {
        self.role.bypasses_zone_check() || self.zone == zone
    }

    pub fn authorize_zone(&self, zone: Zone) -> Result<()> {
        if self.can_access_zone(zone) {
            Ok(())
        } else {
            Err(EngineError::unauthorized(format!(
                "no access to zone {zone}"
            )))
        }
    }

    /// Test hook: age the session so expiry paths can be exercised.
    #[doc(hidden)]
    pub fn backdate_activity(&mut self, by: Duration) {
        self.last_activity -= by;
    }
}

fn hash_pin(pin: &str) -> String {
    let digest = Sha256::digest(pin.as_bytes());
    format!("{digest:x}")
}

#[derive(Debug, Clone)]
pub struct SessionManager {
    db: Database,
    security: SecurityConfig,
}

impl SessionManager {
    pub fn new(db: Database, security: SecurityConfig) -> Self {
        Self { db, security }
    }

    /// Card-tap login: badge only, no PIN. Lockout state still applies.
    pub async fn authenticate_by_badge(&self, badge: &str) -> Result<Session, AuthError> {
        ident::validate_scan_code(badge).map_err(AuthError::Engine)?;
        let operator = self.find_active_operator(badge).await?;
        self.check_lock(&operator)?;

        self.record_login(&operator, "badge login").await?;
        info!(badge = %badge, operator = %operator.full_name, "operator logged in by badge");
        Ok(self.open_session(operator))
    }

    /// Badge + PIN login. Wrong PINs count toward lockout; a successful PIN
    /// login clears the counter.
    pub async fn authenticate_with_pin(
        &self,
        badge: &str,
        pin: &str,
    ) -> Result<Session, AuthError> {
        ident::validate_scan_code(badge).map_err(AuthError::Engine)?;
        let operator = self.find_active_operator(badge).await?;
        self.check_lock(&operator)?;

        let stored: Option<String> =
            sqlx::query("SELECT pin_hash FROM operators WHERE id = ?1")
                .bind(operator.id)
                .fetch_one(self.db.pool())
                .await?
                .try_get("pin_hash")?;

        if stored.as_deref() != Some(hash_pin(pin).as_str()) {
            self.record_failed_attempt(&operator).await?;
            return Err(AuthError::WrongCredential);
        }

        sqlx::query(
            "UPDATE operators SET failed_attempts = 0, locked_until = NULL, updated_at = ?1 WHERE id = ?2",
        )
        .bind(Utc::now())
        .bind(operator.id)
        .execute(self.db.pool())
        .await?;

        self.record_login(&operator, "PIN login").await?;
        info!(badge = %badge, operator = %operator.full_name, "operator logged in with PIN");
        Ok(self.open_session(operator))
    }

    pub async fn logout(&self, session: &Session) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::LOGOUT,
            "SESSION",
            None,
            "",
            "",
            "session closed",
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Re-verify the PIN of the logged-in operator before a sensitive action.
    pub async fn verify_pin(&self, session: &Session, pin: &str) -> Result<bool> {
        session.ensure_active()?;
        let row = sqlx::query("SELECT pin_hash FROM operators WHERE id = ?1")
            .bind(session.operator_id)
            .fetch_optional(self.db.pool())
            .await?;
        let stored: Option<String> = match row {
            Some(row) => row.try_get("pin_hash")?,
            None => return Ok(false),
        };
        Ok(stored.as_deref() == Some(hash_pin(pin).as_str()))
    }

    pub async fn change_pin(&self, session: &Session, old_pin: &str, new_pin: &str) -> Result<()> {
        session.ensure_active()?;
        if new_pin.len() < 4 || new_pin.len() > 6 {
            return Err(EngineError::validation("PIN must be 4 to 6 characters"));
        }
        if !self.verify_pin(session, old_pin).await? {
            return Err(EngineError::unauthorized("current PIN does not match"));
        }

        let mut tx = self.db.pool().begin().await?;
        sqlx::query("UPDATE operators SET pin_hash = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(hash_pin(new_pin))
            .bind(Utc::now())
            .bind(session.operator_id)
            .execute(&mut *tx)
            .await?;
        audit::append(
            &mut tx,
            Some(session.operator_id),
            action::UPDATE,
            "OPERATOR",
            Some(session.operator_id),
            "",
            "",
            "PIN changed",
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Move the session to another zone, subject to the zone-access rule.
    pub fn switch_zone(&self, session: &mut Session, zone: Zone) -> Result<()> {
        session.ensure_active()?;
        session.authorize_zone(zone)?;
        session.zone = zone;
        session.refresh();
        Ok(())
    }

    /// First-run seeding: only permitted while the operators table is empty.
    pub async fn bootstrap_admin(&self, badge: &str, full_name: &str, pin: &str) -> Result<i64> {
        ident::validate_scan_code(badge)?;
        if pin.len() < 4 || pin.len() > 6 {
            return Err(EngineError::validation("PIN must be 4 to 6 characters"));
        }
        let count: i64 = sqlx::query("SELECT COUNT(*) AS cnt FROM operators")
            .fetch_one(self.db.pool())
            .await?
            .try_get("cnt")?;
        if count > 0 {
            return Err(EngineError::invalid_state(
                "operators already exist; use create_operator",
            ));
        }

        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO operators (
                badge_number, full_name, pin_hash, role_code, default_zone,
                can_approve_sterilization, can_release_load, is_active,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 1, 1, 1, ?6, ?6)
            "#,
        )
        .bind(badge)
        .bind(full_name)
        .bind(hash_pin(pin))
        .bind(Role::Admin.as_str())
        .bind(Zone::Sterile.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();
        audit::append(
            &mut tx,
            Some(id),
            action::CREATE,
            "OPERATOR",
            Some(id),
            "",
            "",
            "bootstrap admin",
        )
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Create an operator account. Requires supervisor level or above.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_operator(
        &self,
        actor: &Session,
        badge: &str,
        full_name: &str,
        pin: &str,
        role: Role,
        default_zone: Zone,
        can_approve_sterilization: bool,
        can_release_load: bool,
    ) -> Result<i64> {
        actor.ensure_active()?;
        if actor.role.level() < Role::Supervisor.level() {
            return Err(EngineError::unauthorized(
                "supervisor level required to create operators",
            ));
        }
        ident::validate_scan_code(badge)?;
        if pin.len() < 4 || pin.len() > 6 {
            return Err(EngineError::validation("PIN must be 4 to 6 characters"));
        }

        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO operators (
                badge_number, full_name, pin_hash, role_code, default_zone,
                can_approve_sterilization, can_release_load, is_active,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)
            "#,
        )
        .bind(badge)
        .bind(full_name)
        .bind(hash_pin(pin))
        .bind(role.as_str())
        .bind(default_zone.as_str())
        .bind(can_approve_sterilization)
        .bind(can_release_load)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();
        audit::append(
            &mut tx,
            Some(actor.operator_id),
            action::CREATE,
            "OPERATOR",
            Some(id),
            "",
            role.as_str(),
            full_name,
        )
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    fn open_session(&self, operator: Operator) -> Session {
        let now = Utc::now();
        Session {
            operator_id: operator.id,
            badge_number: operator.badge_number,
            full_name: operator.full_name,
            role: operator.role,
            zone: operator.default_zone,
            can_approve_sterilization: operator.can_approve_sterilization,
            can_release_load: operator.can_release_load,
            login_time: now,
            last_activity: now,
            timeout: Duration::minutes(self.security.session_timeout_minutes),
        }
    }

    fn check_lock(&self, operator: &Operator) -> Result<(), AuthError> {
        if let Some(until) = operator.locked_until {
            if operator.is_locked(Utc::now()) {
                warn!(badge = %operator.badge_number, %until, "login refused: account locked");
                return Err(AuthError::Locked { until });
            }
        }
        Ok(())
    }

    async fn find_active_operator(&self, badge: &str) -> Result<Operator, AuthError> {
        let row = sqlx::query(
            "SELECT * FROM operators WHERE badge_number = ?1 AND is_active = 1",
        )
        .bind(badge)
        .fetch_optional(self.db.pool())
        .await?;
        let row = row.ok_or(AuthError::NotFound)?;
        Ok(Operator {
            id: row.try_get("id")?,
            badge_number: row.try_get("badge_number")?,
            full_name: row.try_get("full_name")?,
            role: row
                .try_get::<String, _>("role_code")?
                .parse()
                .map_err(EngineError::from)?,
            default_zone: row
                .try_get::<String, _>("default_zone")?
                .parse()
                .map_err(EngineError::from)?,
            can_approve_sterilization: row.try_get("can_approve_sterilization")?,
            can_release_load: row.try_get("can_release_load")?,
            is_active: row.try_get("is_active")?,
            last_login: row.try_get("last_login")?,
            failed_attempts: row.try_get("failed_attempts")?,
            locked_until: row.try_get("locked_until")?,
        })
    }

    async fn record_failed_attempt(&self, operator: &Operator) -> Result<(), AuthError> {
        let attempts = operator.failed_attempts + 1;
        let locked_until = if attempts >= self.security.max_failed_attempts {
            warn!(
                badge = %operator.badge_number,
                attempts,
                "lockout threshold reached"
            );
            Some(Utc::now() + Duration::minutes(self.security.lockout_duration_minutes))
        } else {
            None
        };
        sqlx::query(
            "UPDATE operators SET failed_attempts = ?1, locked_until = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(attempts)
        .bind(locked_until)
        .bind(Utc::now())
        .bind(operator.id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn record_login(&self, operator: &Operator, how: &str) -> Result<(), AuthError> {
        let mut tx = self.db.pool().begin().await?;
        sqlx::query("UPDATE operators SET last_login = ?1, updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(operator.id)
            .execute(&mut *tx)
            .await?;
        audit::append(
            &mut tx,
            Some(operator.id),
            action::LOGIN,
            "SESSION",
            None,
            "",
            "",
            how,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
