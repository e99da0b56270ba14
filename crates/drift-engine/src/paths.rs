//! Storage key layout for the persisted migration state.
//!
//! All documents for one database live under the `database={name}/`
//! prefix. The ledger keeps one document per applied unit plus a manifest
//! pinning the key scheme; the lock is a single well-known document.
//!
//! ```text
//! database={db}/
//! ├── {ledger_collection}/
//! │   ├── .manifest.json          # key scheme, created once
//! │   └── {unit_key}.json         # one per applied unit
//! └── {lock_collection}.json      # run lock document
//! ```

use crate::unit::UnitKey;

/// Returns the prefix under which all state for a database lives.
#[must_use]
pub fn database_prefix(database: &str) -> String {
    format!("database={database}/")
}

/// Returns the prefix for ledger entry documents.
#[must_use]
pub fn ledger_prefix(database: &str, collection: &str) -> String {
    format!("database={database}/{collection}/")
}

/// Returns the path of the ledger manifest document.
#[must_use]
pub fn ledger_manifest(database: &str, collection: &str) -> String {
    format!("database={database}/{collection}/.manifest.json")
}

/// Returns the path of one ledger entry document.
#[must_use]
pub fn ledger_entry(database: &str, collection: &str, key: &UnitKey) -> String {
    format!(
        "database={database}/{collection}/{}.json",
        key.storage_key()
    )
}

/// Returns the path of the run lock document.
#[must_use]
pub fn lock_document(database: &str, collection: &str) -> String {
    format!("database={database}/{collection}.json")
}
