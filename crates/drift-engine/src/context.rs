//! Per-run context passed to change units that request it.
//!
//! The context is built once by the runner before any unit executes and is
//! immutable from then on: units read configuration values from it, they
//! do not communicate through it.

use std::collections::BTreeMap;
use std::sync::Arc;

use drift_core::storage::StorageBackend;

/// Immutable context for one migration run.
///
/// Cheap to clone; the variable map is shared behind an `Arc`.
#[derive(Clone)]
pub struct RunContext {
    storage: Arc<dyn StorageBackend>,
    database: String,
    profile: Option<String>,
    variables: Arc<BTreeMap<String, serde_json::Value>>,
}

impl RunContext {
    /// Creates a context with no profile and no variables.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, database: impl Into<String>) -> Self {
        Self {
            storage,
            database: database.into(),
            profile: None,
            variables: Arc::new(BTreeMap::new()),
        }
    }

    /// Sets the active profile name.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Sets the custom variable map.
    #[must_use]
    pub fn with_variables(mut self, variables: BTreeMap<String, serde_json::Value>) -> Self {
        self.variables = Arc::new(variables);
        self
    }

    /// Returns the database storage handle.
    #[must_use]
    pub fn storage(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.storage)
    }

    /// Returns the target database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the active profile name, if one is configured.
    #[must_use]
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// Looks up a custom variable by name.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.variables.get(name)
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("database", &self.database)
            .field("profile", &self.profile)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
