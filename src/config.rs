use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for SteriTrack
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SteriTrackConfig {
    /// Database settings
    pub database: DatabaseConfig,
    /// Authentication and session settings
    pub security: SecurityConfig,
    /// Sterilization policy settings
    pub sterilization: SterilizationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Inactivity timeout before a session expires (checked on access)
    pub session_timeout_minutes: i64,
    /// Failed PIN attempts before the account locks
    pub max_failed_attempts: i64,
    /// Lockout duration after too many failed attempts
    pub lockout_duration_minutes: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SterilizationConfig {
    /// Validity window for methods without an explicit entry
    pub default_validity_days: i64,
    pub steam_validity_days: i64,
    pub plasma_validity_days: i64,
    pub eto_validity_days: i64,
    /// Hours a biological indicator incubates before it is ready to read
    pub bi_incubation_hours: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:steritrack.db".to_string(),
            max_connections: 5,
            auto_migrate: true,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            session_timeout_minutes: 30,
            max_failed_attempts: 5,
            lockout_duration_minutes: 30,
        }
    }
}

impl Default for SterilizationConfig {
    fn default() -> Self {
        Self {
            default_validity_days: 30,
            steam_validity_days: 30,
            plasma_validity_days: 180,
            eto_validity_days: 365,
            bi_incubation_hours: 24,
        }
    }
}

impl Default for SteriTrackConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            security: SecurityConfig::default(),
            sterilization: SterilizationConfig::default(),
        }
    }
}

impl SteriTrackConfig {
    /// Load configuration from steritrack.toml (if present) layered with
    /// STERITRACK-prefixed environment variables over the built-in defaults.
    pub fn load() -> Result<Self> {
        let defaults = SteriTrackConfig::default();

        let mut builder = Config::builder()
            .set_default("database.url", defaults.database.url.clone())?
            .set_default(
                "database.max_connections",
                defaults.database.max_connections as i64,
            )?
            .set_default("database.auto_migrate", defaults.database.auto_migrate)?
            .set_default(
                "security.session_timeout_minutes",
                defaults.security.session_timeout_minutes,
            )?
            .set_default(
                "security.max_failed_attempts",
                defaults.security.max_failed_attempts,
            )?
            .set_default(
                "security.lockout_duration_minutes",
                defaults.security.lockout_duration_minutes,
            )?
            .set_default(
                "sterilization.default_validity_days",
                defaults.sterilization.default_validity_days,
            )?
            .set_default(
                "sterilization.steam_validity_days",
                defaults.sterilization.steam_validity_days,
            )?
            .set_default(
                "sterilization.plasma_validity_days",
                defaults.sterilization.plasma_validity_days,
            )?
            .set_default(
                "sterilization.eto_validity_days",
                defaults.sterilization.eto_validity_days,
            )?
            .set_default(
                "sterilization.bi_incubation_hours",
                defaults.sterilization.bi_incubation_hours,
            )?;

        if Path::new("steritrack.toml").exists() {
            builder = builder.add_source(File::with_name("steritrack"));
        }

        builder = builder.add_source(
            Environment::with_prefix("STERITRACK")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validity window in days for a sterilization method tag.
    pub fn validity_days(&self, method: &str) -> i64 {
        self.sterilization.validity_days(method)
    }
}

impl SterilizationConfig {
    pub fn validity_days(&self, method: &str) -> i64 {
        match method {
            "STEAM" => self.steam_validity_days,
            "PLASMA" => self.plasma_validity_days,
            "ETO" => self.eto_validity_days,
            _ => self.default_validity_days,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = SteriTrackConfig::default();
        assert_eq!(config.sterilization.steam_validity_days, 30);
        assert_eq!(config.sterilization.plasma_validity_days, 180);
        assert_eq!(config.sterilization.eto_validity_days, 365);
        assert_eq!(config.sterilization.bi_incubation_hours, 24);
        assert_eq!(config.security.session_timeout_minutes, 30);
    }

    #[test]
    fn validity_days_falls_back_to_default() {
        let config = SteriTrackConfig::default();
        assert_eq!(config.validity_days("STEAM"), 30);
        assert_eq!(config.validity_days("ETO"), 365);
        assert_eq!(config.validity_days("DRY_HEAT"), 30);
    }
}
