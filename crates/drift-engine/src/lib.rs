//! # drift-engine
//!
//! The migration orchestration engine for Drift.
//!
//! This crate implements the core of the migration runner:
//!
//! - **Registry**: Ordered, validated catalog of change units
//! - **Ledger**: Append-only idempotence record of applied units
//! - **Run Lock**: Cross-process mutual exclusion for a run
//! - **Runner**: The execution state machine that decides, per unit,
//!   whether to skip, apply, or re-apply it
//!
//! ## Execution model
//!
//! A run is single-threaded: units execute strictly in registry order, one
//! at a time. Concurrency only exists *across* runner instances, and the
//! persisted run lock is the sole mechanism keeping them exclusive. The
//! ledger's check-then-record pair is deliberately not atomic; it is
//! protected by the lock, not by the store.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use drift_core::MemoryBackend;
//! use drift_engine::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), drift_engine::EngineError> {
//! let storage = Arc::new(MemoryBackend::new());
//!
//! let registry = RegistryBuilder::new()
//!     .group(
//!         ChangeGroup::new("v1_initial").unit(ChangeUnit::new(
//!             1,
//!             "create_accounts",
//!             UnitAction::no_args(|| async { Ok(()) }),
//!         )),
//!     )
//!     .build()?;
//!
//! let config = RunnerConfig::new("orders-db");
//! let report = MigrationRunner::new(storage, config)
//!     .with_registry(registry)
//!     .run()
//!     .await?;
//! assert_eq!(report.applied(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod paths;
pub mod registry;
pub mod runner;
pub mod unit;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::RunnerConfig;
    pub use crate::context::RunContext;
    pub use crate::error::{EngineError, Result};
    pub use crate::ledger::{Ledger, LedgerEntry};
    pub use crate::lock::RunLock;
    pub use crate::registry::{ChangeGroup, Registry, RegistryBuilder};
    pub use crate::runner::{MigrationRunner, RunReport, RunStatus, UnitReport};
    pub use crate::unit::{ChangeUnit, ChangeUnitDescriptor, KeyScheme, UnitAction, UnitOutcome};
}

// Re-export key types at crate root for ergonomics
pub use config::RunnerConfig;
pub use context::RunContext;
pub use error::{EngineError, Result};
pub use ledger::{Ledger, LedgerEntry};
pub use lock::RunLock;
pub use registry::{ChangeGroup, Registry, RegistryBuilder};
pub use runner::{MigrationRunner, RunReport, RunStatus, UnitReport};
pub use unit::{ChangeUnit, ChangeUnitDescriptor, KeyScheme, UnitAction, UnitKey, UnitOutcome};
