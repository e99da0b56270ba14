//! Error types for the migration engine.
//!
//! The taxonomy separates errors that abort a run (configuration, lock
//! timeout, duplicate ids, unsatisfiable unit signatures) from unit-body
//! failures, which are captured per unit in the run report and never
//! surface as `Err` from the runner.

use std::time::Duration;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can abort a migration run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Required configuration is missing or invalid. Raised before any
    /// store access.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// The backing store is unreachable or failed mid-run.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the store failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The run lock was not acquired within the configured wait time and
    /// the runner is configured to fail hard.
    #[error("could not acquire migration lock within {waited:?}")]
    LockTimeout {
        /// How long the runner waited before giving up.
        waited: Duration,
    },

    /// Two change units in the same group share an id. Detected at
    /// registry build time, before anything executes.
    #[error("duplicate change unit id {unit_id} in group '{group}'")]
    DuplicateUnitId {
        /// The repeated unit id.
        unit_id: i64,
        /// The group containing the duplicates.
        group: String,
    },

    /// A unit's declared parameter shape cannot be satisfied by this
    /// runner. Fatal to the whole run, unlike unit-body errors.
    #[error("change unit '{unit}' requires {requirement}, which is not configured")]
    UnsupportedUnitSignature {
        /// Identity of the offending unit (`group/name`).
        unit: String,
        /// The missing dependency.
        requirement: &'static str,
    },

    /// A ledger entry for this unit key already exists.
    ///
    /// The store's uniqueness constraint raised this, which means the
    /// check-then-record window was raced - only reachable when the run
    /// lock is bypassed or misconfigured.
    #[error("ledger entry already exists for unit key '{key}'")]
    DuplicateLedgerEntry {
        /// The unit key that collided.
        key: String,
    },

    /// A persisted document could not be serialized or parsed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl EngineError {
    /// Creates a configuration error with the given message.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a serialization error from a serde failure.
    #[must_use]
    pub fn serialization(context: &str, err: &serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("{context}: {err}"),
        }
    }
}

impl From<drift_core::Error> for EngineError {
    fn from(err: drift_core::Error) -> Self {
        match err {
            drift_core::Error::Serialization { message } => Self::Serialization { message },
            other => Self::Connection {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}
