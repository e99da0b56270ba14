//! The execution ledger: append-only idempotence record of applied units.
//!
//! One document per applied unit, keyed by the configured [`KeyScheme`].
//! Uniqueness is enforced by the storage layer's `DoesNotExist`
//! precondition, not re-derived in application logic, so a racing write
//! surfaces as [`EngineError::DuplicateLedgerEntry`].
//!
//! `is_applied` followed by `record` is two store operations, not one
//! atomic check-and-set. The run lock is the sole mechanism preventing
//! concurrent runs from racing through that window; the ledger does not
//! paper over a bypassed lock.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use drift_core::storage::{StorageBackend, WritePrecondition, WriteResult};

use crate::error::{EngineError, Result};
use crate::paths;
use crate::unit::{KeyScheme, UnitKey};

/// One applied-unit record. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// The unit id.
    pub unit_id: i64,
    /// Name of the owning group.
    pub group: String,
    /// The unit name within the group.
    pub member: String,
    /// When the unit was applied.
    pub applied_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(unit_id: i64, group: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            unit_id,
            group: group.into(),
            member: member.into(),
            applied_at: Utc::now(),
        }
    }
}

/// Manifest pinning the ledger's key scheme.
///
/// Written once at initialization. Changing the scheme against an
/// existing ledger would silently re-run everything, so a mismatch is a
/// configuration error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerManifest {
    key_scheme: KeyScheme,
    created_at: DateTime<Utc>,
}

/// The idempotence oracle and write-once log for one database.
pub struct Ledger {
    storage: Arc<dyn StorageBackend>,
    database: String,
    collection: String,
    scheme: KeyScheme,
}

impl Ledger {
    /// Creates a ledger over the given store.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        database: impl Into<String>,
        collection: impl Into<String>,
        scheme: KeyScheme,
    ) -> Self {
        Self {
            storage,
            database: database.into(),
            collection: collection.into(),
            scheme,
        }
    }

    /// Returns the configured key scheme.
    #[must_use]
    pub const fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    /// Provisions the ledger (idempotent, safe to call every run).
    ///
    /// Writes the manifest if absent; if present, verifies the persisted
    /// key scheme matches the configured one.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] on a key scheme mismatch, or
    /// a connection error if the store is unreachable.
    pub async fn initialize(&self) -> Result<()> {
        let path = paths::ledger_manifest(&self.database, &self.collection);
        let manifest = LedgerManifest {
            key_scheme: self.scheme,
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&manifest)
            .map_err(|e| EngineError::serialization("serialize ledger manifest", &e))?;

        match self
            .storage
            .put(&path, Bytes::from(bytes), WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => {
                tracing::debug!(collection = %self.collection, "ledger manifest created");
                Ok(())
            }
            WriteResult::PreconditionFailed { .. } => {
                let existing = self.storage.get(&path).await?;
                let existing: LedgerManifest = serde_json::from_slice(&existing)
                    .map_err(|e| EngineError::serialization("parse ledger manifest", &e))?;
                if existing.key_scheme == self.scheme {
                    Ok(())
                } else {
                    Err(EngineError::configuration(format!(
                        "ledger '{}' was created with key scheme {:?}, configured scheme is {:?}",
                        self.collection, existing.key_scheme, self.scheme
                    )))
                }
            }
        }
    }

    /// Returns whether a matching entry exists.
    ///
    /// A missing entry is the normal `false` case, never an error.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the store is unreachable.
    pub async fn is_applied(&self, key: &UnitKey) -> Result<bool> {
        let path = paths::ledger_entry(&self.database, &self.collection, key);
        Ok(self.storage.head(&path).await?.is_some())
    }

    /// Appends a new entry under the given key.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateLedgerEntry`] if an entry already
    /// exists for the key - the store's uniqueness constraint fired, which
    /// means the check-then-record window was raced.
    pub async fn record(&self, key: &UnitKey, entry: &LedgerEntry) -> Result<()> {
        let path = paths::ledger_entry(&self.database, &self.collection, key);
        let bytes = serde_json::to_vec(entry)
            .map_err(|e| EngineError::serialization("serialize ledger entry", &e))?;

        match self
            .storage
            .put(&path, Bytes::from(bytes), WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => Ok(()),
            WriteResult::PreconditionFailed { .. } => Err(EngineError::DuplicateLedgerEntry {
                key: key.storage_key(),
            }),
        }
    }

    /// Returns the number of recorded entries.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the store is unreachable.
    pub async fn count(&self) -> Result<usize> {
        let prefix = paths::ledger_prefix(&self.database, &self.collection);
        let manifest = paths::ledger_manifest(&self.database, &self.collection);
        let entries = self.storage.list(&prefix).await?;
        Ok(entries.iter().filter(|meta| meta.path != manifest).count())
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::MemoryBackend;

    fn ledger(storage: Arc<MemoryBackend>) -> Ledger {
        Ledger::new(storage, "orders-db", "migration_log", KeyScheme::UnitId)
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let storage = Arc::new(MemoryBackend::new());
        let ledger = ledger(storage);

        ledger.initialize().await.expect("first init");
        ledger.initialize().await.expect("second init");
    }

    #[tokio::test]
    async fn initialize_rejects_scheme_change() {
        let storage = Arc::new(MemoryBackend::new());
        ledger(Arc::clone(&storage)).initialize().await.expect("init");

        let compound = Ledger::new(
            storage,
            "orders-db",
            "migration_log",
            KeyScheme::UnitIdAndGroup,
        );
        let err = compound.initialize().await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[tokio::test]
    async fn missing_entry_is_false_not_an_error() {
        let storage = Arc::new(MemoryBackend::new());
        let ledger = ledger(storage);
        ledger.initialize().await.expect("init");

        let key = UnitKey::new(KeyScheme::UnitId, 1, "v1");
        assert!(!ledger.is_applied(&key).await.expect("is_applied"));
    }

    #[tokio::test]
    async fn record_then_is_applied() {
        let storage = Arc::new(MemoryBackend::new());
        let ledger = ledger(storage);
        ledger.initialize().await.expect("init");

        let key = UnitKey::new(KeyScheme::UnitId, 1, "v1");
        let entry = LedgerEntry::new(1, "v1", "create_accounts");
        ledger.record(&key, &entry).await.expect("record");

        assert!(ledger.is_applied(&key).await.expect("is_applied"));
        assert_eq!(ledger.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn duplicate_record_surfaces_as_duplicate_entry() {
        let storage = Arc::new(MemoryBackend::new());
        let ledger = ledger(storage);
        ledger.initialize().await.expect("init");

        let key = UnitKey::new(KeyScheme::UnitId, 1, "v1");
        let entry = LedgerEntry::new(1, "v1", "create_accounts");
        ledger.record(&key, &entry).await.expect("first record");

        let err = ledger.record(&key, &entry).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateLedgerEntry { .. }));
    }

    #[tokio::test]
    async fn entry_documents_are_camel_case() {
        let entry = LedgerEntry::new(3, "v1", "add_index");
        let json = serde_json::to_value(&entry).expect("serialize");
        assert!(json.get("unitId").is_some());
        assert!(json.get("appliedAt").is_some());
        assert!(json.get("member").is_some());
    }

    #[tokio::test]
    async fn compound_scheme_keys_by_group_and_id() {
        let storage = Arc::new(MemoryBackend::new());
        let ledger = Ledger::new(
            storage,
            "orders-db",
            "migration_log",
            KeyScheme::UnitIdAndGroup,
        );
        ledger.initialize().await.expect("init");

        let v1 = UnitKey::new(KeyScheme::UnitIdAndGroup, 1, "v1");
        let v2 = UnitKey::new(KeyScheme::UnitIdAndGroup, 1, "v2");
        ledger
            .record(&v1, &LedgerEntry::new(1, "v1", "a"))
            .await
            .expect("record v1");
        ledger
            .record(&v2, &LedgerEntry::new(1, "v2", "b"))
            .await
            .expect("record v2");

        assert!(ledger.is_applied(&v1).await.expect("v1"));
        assert!(ledger.is_applied(&v2).await.expect("v2"));
        assert_eq!(ledger.count().await.expect("count"), 2);
    }
}
