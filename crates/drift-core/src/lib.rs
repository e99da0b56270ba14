//! # drift-core
//!
//! Core abstractions for the Drift schema/data migration runner.
//!
//! This crate provides the foundational types used across all Drift
//! components:
//!
//! - **Storage Trait**: Abstract CAS document store the ledger and lock
//!   are built on
//! - **Version**: The ordered version value type used for version gating
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Structured logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `drift-core` is the only crate allowed to define shared primitives.
//! The engine crate consumes these contracts; it never reaches around them
//! to a concrete backend.
//!
//! ## Example
//!
//! ```rust
//! use drift_core::prelude::*;
//!
//! let version = Version::parse("1.0.3", ".").unwrap();
//! assert!(version < Version::parse("1.1", ".").unwrap());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod observability;
pub mod storage;
pub mod version;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use drift_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
    pub use crate::version::{Version, VersionParseError};
}

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use observability::{LogFormat, init_logging};
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
pub use version::{Version, VersionParseError};
