//! Application settings loaded from config.toml
//!
//! The settings file controls the database location, the notification sweep
//! schedule, and the operator accounts seeded on first run. Every section is
//! optional; a missing file yields the defaults. `DATABASE_URL` and
//! `SWEEP_INTERVAL_SECS` in the environment override the file.

use crate::entities::Role;
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Database URL; `DATABASE_URL` takes precedence when set
    #[serde(default)]
    pub database_url: Option<String>,
    /// Notification sweep schedule
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Operator accounts to create if missing
    #[serde(default)]
    pub users: Vec<UserSeed>,
}

/// Schedule and windows of the notification sweep.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Seconds between sweep runs
    pub interval_secs: u64,
    /// Seconds to wait before the first run after start
    pub initial_delay_secs: u64,
    /// Hours during which a repeated (user, product, type) alert is suppressed
    pub dedup_window_hours: i64,
    /// Days after which read notifications are deleted
    pub retention_days: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            initial_delay_secs: 5,
            dedup_window_hours: 24,
            retention_days: 30,
        }
    }
}

impl SweepConfig {
    /// Interval between runs as a [`Duration`]
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Delay before the first run as a [`Duration`]
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    /// Dedup window as a chrono duration for timestamp arithmetic
    #[must_use]
    pub fn dedup_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.dedup_window_hours)
    }

    /// Retention window as a chrono duration for timestamp arithmetic
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::Config {
                message: "sweep.interval_secs must be greater than zero".to_string(),
            });
        }
        if self.dedup_window_hours <= 0 || self.retention_days <= 0 {
            return Err(Error::Config {
                message: "sweep windows must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// An operator account seeded at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct UserSeed {
    /// Display name
    pub name: String,
    /// Unique email address, used to detect already-seeded users
    pub email: String,
    /// Role, `ADMIN` or `STAFF`
    pub role: Role,
}

/// Loads settings from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - The sweep windows are zero or negative
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    debug!("Loading configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {path_ref:?}: {e}"),
    })?;

    parse_config(&contents)
}

/// Parses settings from TOML text and applies environment overrides.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let mut config: AppConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;
    apply_env_overrides(&mut config)?;
    config.sweep.validate()?;
    Ok(config)
}

/// Loads settings from `./config.toml`, falling back to defaults when the file is absent.
pub fn load_default_config() -> Result<AppConfig> {
    let path = Path::new("config.toml");
    if path.exists() {
        load_config(path)
    } else {
        warn!("config.toml not found, using default settings");
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config)?;
        config.sweep.validate()?;
        Ok(config)
    }
}

fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.database_url = Some(url);
    }
    if let Ok(interval) = std::env::var("SWEEP_INTERVAL_SECS") {
        config.sweep.interval_secs = interval.parse().map_err(|e| Error::Config {
            message: format!("SWEEP_INTERVAL_SECS is not a number: {e}"),
        })?;
    }
    Ok(())
}
