//! Runner configuration.
//!
//! The configuration surface is populated by an external loader (CLI,
//! file, environment); this module only defines the typed shape, the
//! defaults, and the validation the runner performs before touching the
//! store. Defaults match the historical runner: ledger collection
//! `migration_log`, lock collection `migration_lock`, a five minute lock
//! wait with a ten second poll, no waiting and no hard failure unless
//! asked for.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use drift_core::version::Version;

use crate::error::{EngineError, Result};
use crate::unit::KeyScheme;

/// Default ledger collection name.
pub const DEFAULT_LEDGER_COLLECTION: &str = "migration_log";

/// Default lock collection name.
pub const DEFAULT_LOCK_COLLECTION: &str = "migration_lock";

/// Default lock wait time (5 minutes).
pub const DEFAULT_LOCK_WAIT_TIME: Duration = Duration::from_secs(5 * 60);

/// Default lock poll rate (10 seconds).
pub const DEFAULT_LOCK_POLL_RATE: Duration = Duration::from_secs(10);

/// Default migration-group name prefix for version parsing.
pub const DEFAULT_MIGRATION_PREFIX: &str = "V";

/// Configuration for a [`MigrationRunner`](crate::runner::MigrationRunner).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerConfig {
    /// Target database name. Required; scopes every persisted document.
    pub database: String,

    /// Collection name for the execution ledger.
    pub ledger_collection: String,

    /// Collection name for the run lock.
    pub lock_collection: String,

    /// Whether the runner executes at all. When false, `run` exits
    /// immediately without touching the store.
    pub enabled: bool,

    /// Whether to keep polling for the lock when it is already held.
    pub wait_for_lock: bool,

    /// Maximum time to wait for the lock when `wait_for_lock` is set.
    pub lock_wait_time: Duration,

    /// Sleep between lock acquisition attempts.
    pub lock_poll_rate: Duration,

    /// Raise [`EngineError::LockTimeout`] instead of exiting cleanly when
    /// the lock cannot be acquired.
    pub fail_hard_on_lock_timeout: bool,

    /// Fields forming the ledger's idempotence key.
    pub key_scheme: KeyScheme,

    /// Application version for the version gate. Groups versioned above
    /// this are excluded from the run entirely.
    pub app_version: Option<Version>,

    /// Prefix convention for parsing versions out of group names
    /// (e.g. `V1_2__add_users` with prefix `V`).
    pub migration_prefix: String,

    /// Active profile name, passed to units requesting it.
    pub profile: Option<String>,

    /// Custom variables exposed through the run context.
    pub variables: BTreeMap<String, serde_json::Value>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            database: String::new(),
            ledger_collection: DEFAULT_LEDGER_COLLECTION.to_string(),
            lock_collection: DEFAULT_LOCK_COLLECTION.to_string(),
            enabled: true,
            wait_for_lock: false,
            lock_wait_time: DEFAULT_LOCK_WAIT_TIME,
            lock_poll_rate: DEFAULT_LOCK_POLL_RATE,
            fail_hard_on_lock_timeout: false,
            key_scheme: KeyScheme::default(),
            app_version: None,
            migration_prefix: DEFAULT_MIGRATION_PREFIX.to_string(),
            profile: None,
            variables: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    /// Creates a configuration for the given database with defaults for
    /// everything else.
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Validates required fields.
    ///
    /// Called by the runner before any store access.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if the database name is
    /// missing or a collection name is empty.
    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(EngineError::configuration(
                "database name is not set; it must be provided before running migrations",
            ));
        }
        if self.ledger_collection.trim().is_empty() {
            return Err(EngineError::configuration("ledger collection name is empty"));
        }
        if self.lock_collection.trim().is_empty() {
            return Err(EngineError::configuration("lock collection name is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_historical_runner() {
        let config = RunnerConfig::default();
        assert_eq!(config.ledger_collection, "migration_log");
        assert_eq!(config.lock_collection, "migration_lock");
        assert!(config.enabled);
        assert!(!config.wait_for_lock);
        assert_eq!(config.lock_wait_time, Duration::from_secs(300));
        assert_eq!(config.lock_poll_rate, Duration::from_secs(10));
        assert!(!config.fail_hard_on_lock_timeout);
        assert_eq!(config.key_scheme, KeyScheme::UnitId);
        assert_eq!(config.migration_prefix, "V");
    }

    #[test]
    fn validate_requires_database_name() {
        let err = RunnerConfig::default().validate().unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));

        assert!(RunnerConfig::new("orders-db").validate().is_ok());
        assert!(RunnerConfig::new("   ").validate().is_err());
    }

    #[test]
    fn deserializes_with_defaults_for_missing_fields() {
        let config: RunnerConfig =
            serde_json::from_str(r#"{"database": "orders-db"}"#).expect("parse");
        assert_eq!(config.database, "orders-db");
        assert_eq!(config.ledger_collection, "migration_log");
        assert!(config.enabled);
    }

    #[test]
    fn app_version_roundtrips() {
        let mut config = RunnerConfig::new("db");
        config.app_version = Some(Version::new([1, 0, 0]));
        let json = serde_json::to_string(&config).expect("serialize");
        let parsed: RunnerConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.app_version, Some(Version::new([1, 0, 0])));
    }
}
