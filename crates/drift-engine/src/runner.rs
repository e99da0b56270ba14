//! The migration runner: the per-run execution state machine.
//!
//! A run walks the gated registry in order and decides, per unit, whether
//! to skip, apply, or re-apply it against the ledger. Unit-body failures
//! are recorded in the report and never abort the run; configuration
//! problems, lock timeouts (when failing hard), and unsatisfiable unit
//! signatures do.
//!
//! The lock is released on every exit path after acquisition, including
//! fatal mid-run errors. A run error takes precedence over a release error
//! when both occur.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use drift_core::observability::{migration_span, unit_span};
use drift_core::storage::StorageBackend;

use crate::config::RunnerConfig;
use crate::context::RunContext;
use crate::error::{EngineError, Result};
use crate::ledger::{Ledger, LedgerEntry};
use crate::lock::RunLock;
use crate::registry::{ChangeGroup, Registry};
use crate::unit::{ChangeUnit, UnitAction, UnitError, UnitKey, UnitOutcome};

/// Terminal state of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The runner is disabled by configuration; nothing was touched.
    Disabled,
    /// The lock could not be acquired and the runner is configured to exit
    /// cleanly rather than fail hard.
    LockNotAcquired,
    /// The run walked every gated unit.
    Completed,
}

/// Terminal state of one unit within a run.
#[derive(Debug, Clone)]
pub struct UnitReport {
    /// Name of the owning group.
    pub group: String,
    /// The unit id.
    pub unit_id: i64,
    /// The unit name.
    pub name: String,
    /// How the unit ended.
    pub outcome: UnitOutcome,
    /// The unit-body error message, for failed units.
    pub error: Option<String>,
}

/// Summary of one migration run.
#[derive(Debug, Clone)]
pub struct RunReport {
    status: RunStatus,
    units: Vec<UnitReport>,
}

impl RunReport {
    fn empty(status: RunStatus) -> Self {
        Self {
            status,
            units: Vec::new(),
        }
    }

    /// Returns the overall run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns the per-unit reports in execution order.
    #[must_use]
    pub fn units(&self) -> &[UnitReport] {
        &self.units
    }

    /// Returns the number of newly applied units.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.count(UnitOutcome::Applied)
    }

    /// Returns the number of run-always units that were re-invoked.
    #[must_use]
    pub fn reapplied(&self) -> usize {
        self.count(UnitOutcome::Reapplied)
    }

    /// Returns the number of already-applied units that were skipped.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(UnitOutcome::Skipped)
    }

    /// Returns the number of units whose body failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(UnitOutcome::Failed)
    }

    fn count(&self, outcome: UnitOutcome) -> usize {
        self.units.iter().filter(|u| u.outcome == outcome).count()
    }
}

/// The migration runner for one database.
///
/// Construct with a storage backend and configuration, attach a registry,
/// then call [`run`](Self::run). A runner can be reused; each call is an
/// independent run with its own lock handle.
pub struct MigrationRunner {
    storage: Arc<dyn StorageBackend>,
    config: RunnerConfig,
    registry: Option<Registry>,
}

impl MigrationRunner {
    /// Creates a runner over the given store.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, config: RunnerConfig) -> Self {
        Self {
            storage,
            config,
            registry: None,
        }
    }

    /// Attaches the validated registry to execute.
    #[must_use]
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Returns the runner configuration.
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Returns whether a migration run is currently in progress anywhere,
    /// judged by the persisted lock.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the store is unreachable.
    pub async fn is_execution_in_progress(&self) -> Result<bool> {
        let lock = RunLock::new(
            Arc::clone(&self.storage),
            &self.config.database,
            &self.config.lock_collection,
        );
        lock.is_held().await
    }

    /// Executes one migration run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] for invalid configuration,
    /// [`EngineError::LockTimeout`] when the lock is not acquired and
    /// `fail_hard_on_lock_timeout` is set, and
    /// [`EngineError::UnsupportedUnitSignature`] when a unit's declared
    /// dependencies cannot be satisfied. Unit-body failures do not produce
    /// an `Err`; they are reported per unit.
    pub async fn run(&self) -> Result<RunReport> {
        let span = migration_span("run", &self.config.database);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<RunReport> {
        if !self.config.enabled {
            tracing::info!("migration runner is disabled, skipping run");
            return Ok(RunReport::empty(RunStatus::Disabled));
        }

        self.config.validate()?;
        let registry = self.registry.as_ref().ok_or_else(|| {
            EngineError::configuration(
                "no change unit registry attached; call with_registry before running",
            )
        })?;

        let ledger = Ledger::new(
            Arc::clone(&self.storage),
            &self.config.database,
            &self.config.ledger_collection,
            self.config.key_scheme,
        );
        ledger.initialize().await?;

        let lock = RunLock::new(
            Arc::clone(&self.storage),
            &self.config.database,
            &self.config.lock_collection,
        );
        lock.initialize().await?;

        let max_wait = if self.config.wait_for_lock {
            self.config.lock_wait_time
        } else {
            Duration::ZERO
        };
        if !lock
            .acquire_with_wait(self.config.lock_poll_rate, max_wait)
            .await?
        {
            if self.config.fail_hard_on_lock_timeout {
                return Err(EngineError::LockTimeout { waited: max_wait });
            }
            tracing::warn!("migration lock not acquired, exiting without running");
            return Ok(RunReport::empty(RunStatus::LockNotAcquired));
        }

        // Run errors win over release errors, but the lock is always
        // released once acquired.
        let run_result = self.apply(registry, &ledger).await;
        let release_result = lock.release().await;
        let report = run_result?;
        release_result?;

        tracing::info!(
            applied = report.applied(),
            reapplied = report.reapplied(),
            skipped = report.skipped(),
            failed = report.failed(),
            "migration run complete"
        );
        Ok(report)
    }

    async fn apply(&self, registry: &Registry, ledger: &Ledger) -> Result<RunReport> {
        let mut context = RunContext::new(Arc::clone(&self.storage), &self.config.database)
            .with_variables(self.config.variables.clone());
        if let Some(profile) = &self.config.profile {
            context = context.with_profile(profile.clone());
        }

        let mut units = Vec::new();
        let gated = registry.gated(
            self.config.app_version.as_ref(),
            &self.config.migration_prefix,
        );
        for group in gated {
            for unit in group.units() {
                let span = unit_span(group.name(), &unit.id().to_string());
                let report = self
                    .execute_unit(ledger, &context, group, unit)
                    .instrument(span)
                    .await?;
                units.push(report);
            }
        }

        Ok(RunReport {
            status: RunStatus::Completed,
            units,
        })
    }

    async fn execute_unit(
        &self,
        ledger: &Ledger,
        context: &RunContext,
        group: &ChangeGroup,
        unit: &ChangeUnit,
    ) -> Result<UnitReport> {
        let key = UnitKey::new(self.config.key_scheme, unit.id(), group.name());
        let already_applied = ledger.is_applied(&key).await?;

        let outcome = if !already_applied {
            match self.invoke(group.name(), unit, context).await? {
                Ok(()) => {
                    let entry = LedgerEntry::new(unit.id(), group.name(), unit.name());
                    ledger.record(&key, &entry).await?;
                    tracing::info!(unit = unit.name(), "change unit applied");
                    (UnitOutcome::Applied, None)
                }
                Err(err) => {
                    tracing::error!(unit = unit.name(), error = %err, "change unit failed");
                    (UnitOutcome::Failed, Some(err.to_string()))
                }
            }
        } else if unit.is_run_always() {
            match self.invoke(group.name(), unit, context).await? {
                Ok(()) => {
                    tracing::info!(unit = unit.name(), "run-always change unit re-applied");
                    (UnitOutcome::Reapplied, None)
                }
                Err(err) => {
                    tracing::error!(unit = unit.name(), error = %err, "change unit failed");
                    (UnitOutcome::Failed, Some(err.to_string()))
                }
            }
        } else {
            tracing::debug!(unit = unit.name(), "change unit already applied, skipping");
            (UnitOutcome::Skipped, None)
        };

        Ok(UnitReport {
            group: group.name().to_string(),
            unit_id: unit.id(),
            name: unit.name().to_string(),
            outcome: outcome.0,
            error: outcome.1,
        })
    }

    /// Dispatches on the unit's declared parameter shape.
    ///
    /// The outer `Result` is fatal to the run (an unsatisfiable signature);
    /// the inner one is the unit body's own outcome.
    async fn invoke(
        &self,
        group: &str,
        unit: &ChangeUnit,
        context: &RunContext,
    ) -> Result<std::result::Result<(), UnitError>> {
        match unit.action() {
            UnitAction::NoArgs(f) => Ok(f().await),
            UnitAction::Database(f) => Ok(f(context.storage()).await),
            UnitAction::DatabaseWithProfile(f) => match context.profile() {
                Some(profile) => Ok(f(context.storage(), profile.to_string()).await),
                None => Err(EngineError::UnsupportedUnitSignature {
                    unit: format!("{group}/{}", unit.name()),
                    requirement: "an active profile",
                }),
            },
            UnitAction::Context(f) => Ok(f(context.clone()).await),
        }
    }
}

impl std::fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRunner")
            .field("database", &self.config.database)
            .field(
                "units",
                &self.registry.as_ref().map_or(0, Registry::unit_count),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use drift_core::MemoryBackend;
    use drift_core::version::Version;

    use crate::registry::RegistryBuilder;

    fn counting_unit(id: i64, name: &str, counter: Arc<AtomicUsize>) -> ChangeUnit {
        ChangeUnit::new(
            id,
            name,
            UnitAction::no_args(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
    }

    #[tokio::test]
    async fn disabled_runner_touches_nothing() {
        let storage = Arc::new(MemoryBackend::new());
        let mut config = RunnerConfig::new("db");
        config.enabled = false;

        let report = MigrationRunner::new(Arc::clone(&storage) as _, config)
            .run()
            .await
            .expect("run");
        assert_eq!(report.status(), RunStatus::Disabled);
        assert!(storage.list("").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn missing_database_is_a_configuration_error() {
        let storage = Arc::new(MemoryBackend::new());
        let err = MigrationRunner::new(storage as _, RunnerConfig::default())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[tokio::test]
    async fn missing_registry_is_a_configuration_error() {
        let storage = Arc::new(MemoryBackend::new());
        let err = MigrationRunner::new(storage as _, RunnerConfig::new("db"))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[tokio::test]
    async fn first_run_applies_and_records() {
        let storage = Arc::new(MemoryBackend::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = RegistryBuilder::new()
            .group(
                ChangeGroup::new("v1")
                    .unit(counting_unit(1, "a", Arc::clone(&counter)))
                    .unit(counting_unit(2, "b", Arc::clone(&counter))),
            )
            .build()
            .expect("build");

        let report = MigrationRunner::new(storage as _, RunnerConfig::new("db"))
            .with_registry(registry)
            .run()
            .await
            .expect("run");

        assert_eq!(report.status(), RunStatus::Completed);
        assert_eq!(report.applied(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_unit_is_reported_and_not_recorded() {
        let storage = Arc::new(MemoryBackend::new());
        let registry = RegistryBuilder::new()
            .group(
                ChangeGroup::new("v1")
                    .unit(ChangeUnit::new(
                        1,
                        "boom",
                        UnitAction::no_args(|| async { Err("backfill failed".into()) }),
                    ))
                    .unit(ChangeUnit::new(
                        2,
                        "after",
                        UnitAction::no_args(|| async { Ok(()) }),
                    )),
            )
            .build()
            .expect("build");

        let runner =
            MigrationRunner::new(Arc::clone(&storage) as _, RunnerConfig::new("db"))
                .with_registry(registry);
        let report = runner.run().await.expect("run");

        assert_eq!(report.failed(), 1);
        // Subsequent units still ran
        assert_eq!(report.applied(), 1);
        let failed = &report.units()[0];
        assert_eq!(failed.outcome, UnitOutcome::Failed);
        assert!(failed.error.as_deref().unwrap_or("").contains("backfill"));

        // Failed unit left no ledger entry, so it retries next run
        let second = runner.run().await.expect("second run");
        assert_eq!(second.failed(), 1);
        assert_eq!(second.skipped(), 1);
    }

    #[tokio::test]
    async fn profile_unit_without_profile_is_fatal_and_releases_the_lock() {
        let storage = Arc::new(MemoryBackend::new());
        let registry = RegistryBuilder::new()
            .group(ChangeGroup::new("v1").unit(ChangeUnit::new(
                1,
                "needs_profile",
                UnitAction::database_with_profile(|_db, _profile| async { Ok(()) }),
            )))
            .build()
            .expect("build");

        let runner = MigrationRunner::new(Arc::clone(&storage) as _, RunnerConfig::new("db"))
            .with_registry(registry);
        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedUnitSignature { .. }));

        // The lock was released despite the fatal error
        assert!(!runner.is_execution_in_progress().await.expect("is_held"));
    }

    #[tokio::test]
    async fn profile_unit_receives_the_configured_profile() {
        let storage = Arc::new(MemoryBackend::new());
        let seen = Arc::new(std::sync::Mutex::new(String::new()));
        let seen_in_unit = Arc::clone(&seen);
        let registry = RegistryBuilder::new()
            .group(ChangeGroup::new("v1").unit(ChangeUnit::new(
                1,
                "needs_profile",
                UnitAction::database_with_profile(move |_db, profile| {
                    let seen = Arc::clone(&seen_in_unit);
                    async move {
                        *seen.lock().unwrap() = profile;
                        Ok(())
                    }
                }),
            )))
            .build()
            .expect("build");

        let mut config = RunnerConfig::new("db");
        config.profile = Some("dev".to_string());
        let report = MigrationRunner::new(storage as _, config)
            .with_registry(registry)
            .run()
            .await
            .expect("run");

        assert_eq!(report.applied(), 1);
        assert_eq!(*seen.lock().unwrap(), "dev");
    }

    #[tokio::test]
    async fn context_unit_sees_variables() {
        let storage = Arc::new(MemoryBackend::new());
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in_unit = Arc::clone(&seen);
        let registry = RegistryBuilder::new()
            .group(ChangeGroup::new("v1").unit(ChangeUnit::new(
                1,
                "uses_context",
                UnitAction::context(move |ctx| {
                    let seen = Arc::clone(&seen_in_unit);
                    async move {
                        *seen.lock().unwrap() = ctx.variable("batch_size").cloned();
                        Ok(())
                    }
                }),
            )))
            .build()
            .expect("build");

        let mut config = RunnerConfig::new("db");
        config
            .variables
            .insert("batch_size".to_string(), serde_json::json!(500));
        MigrationRunner::new(storage as _, config)
            .with_registry(registry)
            .run()
            .await
            .expect("run");

        assert_eq!(*seen.lock().unwrap(), Some(serde_json::json!(500)));
    }

    #[tokio::test]
    async fn held_lock_exits_cleanly_by_default() {
        let storage = Arc::new(MemoryBackend::new());
        let other = RunLock::new(Arc::clone(&storage) as _, "db", "migration_lock");
        assert!(other.try_acquire().await.expect("acquire"));

        let counter = Arc::new(AtomicUsize::new(0));
        let registry = RegistryBuilder::new()
            .group(ChangeGroup::new("v1").unit(counting_unit(1, "a", Arc::clone(&counter))))
            .build()
            .expect("build");

        let report = MigrationRunner::new(Arc::clone(&storage) as _, RunnerConfig::new("db"))
            .with_registry(registry)
            .run()
            .await
            .expect("run");

        assert_eq!(report.status(), RunStatus::LockNotAcquired);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn held_lock_fails_hard_when_asked() {
        let storage = Arc::new(MemoryBackend::new());
        let other = RunLock::new(Arc::clone(&storage) as _, "db", "migration_lock");
        assert!(other.try_acquire().await.expect("acquire"));

        let mut config = RunnerConfig::new("db");
        config.fail_hard_on_lock_timeout = true;

        let registry = RegistryBuilder::new()
            .group(ChangeGroup::new("v1").unit(ChangeUnit::new(
                1,
                "noop",
                UnitAction::no_args(|| async { Ok(()) }),
            )))
            .build()
            .expect("build");
        let err = MigrationRunner::new(storage as _, config)
            .with_registry(registry)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LockTimeout { .. }));
    }

    #[tokio::test]
    async fn version_gate_uses_prefixed_group_names() {
        let storage = Arc::new(MemoryBackend::new());
        let applied_future = Arc::new(AtomicUsize::new(0));
        let applied_current = Arc::new(AtomicUsize::new(0));
        let registry = RegistryBuilder::new()
            .group(
                ChangeGroup::new("V1_0__initial")
                    .unit(counting_unit(1, "a", Arc::clone(&applied_current))),
            )
            .group(
                ChangeGroup::new("V2_0__later")
                    .unit(counting_unit(2, "b", Arc::clone(&applied_future))),
            )
            .build()
            .expect("build");

        let mut config = RunnerConfig::new("db");
        config.app_version = Some(Version::new([1, 5]));
        let report = MigrationRunner::new(storage as _, config)
            .with_registry(registry)
            .run()
            .await
            .expect("run");

        assert_eq!(report.applied(), 1);
        assert_eq!(applied_current.load(Ordering::SeqCst), 1);
        assert_eq!(applied_future.load(Ordering::SeqCst), 0);
    }
}
