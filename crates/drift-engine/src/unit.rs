//! Change units: the individual migration actions a run executes.
//!
//! A [`ChangeUnit`] pairs immutable metadata (id, ordering key, run-always
//! flag) with a bound callable. What the callable needs is declared up
//! front as a [`UnitAction`] variant rather than re-derived at invocation
//! time, so the runner dispatches on an explicit tag instead of inspecting
//! a signature.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use drift_core::storage::StorageBackend;

use crate::context::RunContext;

/// Error type produced by a change unit's own body.
///
/// Unit-body failures are caught per unit and logged; they never abort the
/// run.
pub type UnitError = Box<dyn std::error::Error + Send + Sync>;

type UnitFuture = BoxFuture<'static, std::result::Result<(), UnitError>>;

/// Which fields form the idempotence key of a ledger entry.
///
/// The unit-id-only scheme is canonical; the compound scheme keys entries
/// by `(group, id)` for ledgers migrated from deployments where ids were
/// only unique per group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScheme {
    /// Key ledger entries by unit id alone.
    #[default]
    UnitId,
    /// Key ledger entries by `(group name, unit id)`.
    UnitIdAndGroup,
}

/// The idempotence key identifying one applied unit in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitKey {
    unit_id: i64,
    group: Option<String>,
}

impl UnitKey {
    /// Computes the key for a unit under the given scheme.
    #[must_use]
    pub fn new(scheme: KeyScheme, unit_id: i64, group: &str) -> Self {
        match scheme {
            KeyScheme::UnitId => Self {
                unit_id,
                group: None,
            },
            KeyScheme::UnitIdAndGroup => Self {
                unit_id,
                group: Some(group.to_string()),
            },
        }
    }

    /// Returns the key as a storage path segment.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match &self.group {
            Some(group) => format!("{group}/{}", self.unit_id),
            None => self.unit_id.to_string(),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

/// Immutable metadata for one change unit, scoped to its owning group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeUnitDescriptor {
    /// Unit id, unique within its group.
    pub id: i64,
    /// Unit name (the source member name, e.g. the migration function).
    pub name: String,
    /// Explicit ordering key; units without one order by id.
    pub order: Option<String>,
    /// Whether this unit is re-invoked on every run.
    pub run_always: bool,
    /// Name of the owning group.
    pub group: String,
}

/// Terminal state of one unit within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcome {
    /// Unit was new, executed, and recorded in the ledger.
    Applied,
    /// Unit was already recorded but is marked run-always; executed again
    /// without a new ledger entry.
    Reapplied,
    /// Unit was already recorded; not invoked.
    Skipped,
    /// Unit body raised an error; logged and not recorded.
    Failed,
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Applied => "applied",
            Self::Reapplied => "re-applied",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        write!(f, "{text}")
    }
}

/// The bound callable of a change unit, tagged with its parameter shape.
///
/// The shape is resolved once at registration; the runner matches on the
/// variant and raises a fatal error when a required dependency (e.g. a
/// profile for [`UnitAction::DatabaseWithProfile`]) is not configured.
#[derive(Clone)]
pub enum UnitAction {
    /// The unit takes no parameters.
    NoArgs(Arc<dyn Fn() -> UnitFuture + Send + Sync>),
    /// The unit receives the database storage handle.
    Database(Arc<dyn Fn(Arc<dyn StorageBackend>) -> UnitFuture + Send + Sync>),
    /// The unit receives the storage handle and the active profile name.
    DatabaseWithProfile(Arc<dyn Fn(Arc<dyn StorageBackend>, String) -> UnitFuture + Send + Sync>),
    /// The unit receives the full run context.
    Context(Arc<dyn Fn(RunContext) -> UnitFuture + Send + Sync>),
}

impl UnitAction {
    /// Wraps a no-parameter callable.
    pub fn no_args<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), UnitError>> + Send + 'static,
    {
        Self::NoArgs(Arc::new(move || Box::pin(f())))
    }

    /// Wraps a callable taking the database storage handle.
    pub fn database<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<dyn StorageBackend>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), UnitError>> + Send + 'static,
    {
        Self::Database(Arc::new(move |db| Box::pin(f(db))))
    }

    /// Wraps a callable taking the storage handle and the profile name.
    pub fn database_with_profile<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<dyn StorageBackend>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), UnitError>> + Send + 'static,
    {
        Self::DatabaseWithProfile(Arc::new(move |db, profile| Box::pin(f(db, profile))))
    }

    /// Wraps a callable taking the run context.
    pub fn context<F, Fut>(f: F) -> Self
    where
        F: Fn(RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), UnitError>> + Send + 'static,
    {
        Self::Context(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    /// Returns the declared shape as a label for logs and errors.
    #[must_use]
    pub const fn signature(&self) -> &'static str {
        match self {
            Self::NoArgs(_) => "no_args",
            Self::Database(_) => "database",
            Self::DatabaseWithProfile(_) => "database_with_profile",
            Self::Context(_) => "context",
        }
    }
}

impl fmt::Debug for UnitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UnitAction").field(&self.signature()).finish()
    }
}

/// One registered migration action: metadata plus the bound callable.
#[derive(Debug, Clone)]
pub struct ChangeUnit {
    id: i64,
    name: String,
    order: Option<String>,
    run_always: bool,
    action: UnitAction,
}

impl ChangeUnit {
    /// Creates a change unit with the given id, name, and action.
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>, action: UnitAction) -> Self {
        Self {
            id,
            name: name.into(),
            order: None,
            run_always: false,
            action,
        }
    }

    /// Sets an explicit ordering key.
    #[must_use]
    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Marks this unit as run-always: it is re-invoked on every run
    /// regardless of ledger state, but recorded at most once.
    #[must_use]
    pub const fn run_always(mut self) -> Self {
        self.run_always = true;
        self
    }

    /// Returns the unit id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Returns the unit name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the explicit ordering key, if any.
    #[must_use]
    pub fn order(&self) -> Option<&str> {
        self.order.as_deref()
    }

    /// Returns whether the unit is marked run-always.
    #[must_use]
    pub const fn is_run_always(&self) -> bool {
        self.run_always
    }

    /// Returns the bound action.
    #[must_use]
    pub const fn action(&self) -> &UnitAction {
        &self.action
    }

    /// Returns the effective ordering key: the explicit order if set,
    /// else the zero-padded id.
    #[must_use]
    pub fn order_key(&self) -> String {
        self.order
            .clone()
            .unwrap_or_else(|| format!("{:020}", self.id))
    }

    /// Builds the descriptor for this unit under the given group.
    #[must_use]
    pub fn descriptor(&self, group: &str) -> ChangeUnitDescriptor {
        ChangeUnitDescriptor {
            id: self.id,
            name: self.name.clone(),
            order: self.order.clone(),
            run_always: self.run_always,
            group: group.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> UnitAction {
        UnitAction::no_args(|| async { Ok(()) })
    }

    #[test]
    fn unit_key_schemes() {
        let plain = UnitKey::new(KeyScheme::UnitId, 7, "v1_initial");
        assert_eq!(plain.storage_key(), "7");

        let compound = UnitKey::new(KeyScheme::UnitIdAndGroup, 7, "v1_initial");
        assert_eq!(compound.storage_key(), "v1_initial/7");
    }

    #[test]
    fn same_id_different_group_is_distinct_only_under_compound_scheme() {
        let a = UnitKey::new(KeyScheme::UnitId, 1, "g1");
        let b = UnitKey::new(KeyScheme::UnitId, 1, "g2");
        assert_eq!(a, b);

        let a = UnitKey::new(KeyScheme::UnitIdAndGroup, 1, "g1");
        let b = UnitKey::new(KeyScheme::UnitIdAndGroup, 1, "g2");
        assert_ne!(a, b);
    }

    #[test]
    fn order_key_falls_back_to_padded_id() {
        let explicit = ChangeUnit::new(2, "x", noop()).with_order("01");
        assert_eq!(explicit.order_key(), "01");

        let fallback = ChangeUnit::new(2, "x", noop());
        let later = ChangeUnit::new(10, "y", noop());
        // Padded so id 2 sorts before id 10 as strings
        assert!(fallback.order_key() < later.order_key());
    }

    #[test]
    fn descriptor_carries_group_identity() {
        let unit = ChangeUnit::new(3, "add_index", noop()).run_always();
        let descriptor = unit.descriptor("v2_indexes");
        assert_eq!(descriptor.id, 3);
        assert_eq!(descriptor.group, "v2_indexes");
        assert!(descriptor.run_always);
    }

    #[test]
    fn action_signature_labels() {
        assert_eq!(noop().signature(), "no_args");
        assert_eq!(
            UnitAction::database(|_db| async { Ok(()) }).signature(),
            "database"
        );
        assert_eq!(
            UnitAction::database_with_profile(|_db, _profile| async { Ok(()) }).signature(),
            "database_with_profile"
        );
        assert_eq!(
            UnitAction::context(|_ctx| async { Ok(()) }).signature(),
            "context"
        );
    }

    #[tokio::test]
    async fn wrapped_actions_are_invokable() {
        let action = UnitAction::no_args(|| async { Ok(()) });
        if let UnitAction::NoArgs(f) = &action {
            f().await.expect("unit should succeed");
        } else {
            panic!("expected NoArgs");
        }
    }
}
