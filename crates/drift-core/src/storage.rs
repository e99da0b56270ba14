//! Storage backend abstraction for the persisted migration state.
//!
//! The ledger and the run lock are both plain documents in a durable store.
//! This module defines the contract that every backend must implement:
//! - Conditional writes with preconditions (CAS)
//! - Document metadata including an opaque version token
//!
//! The lock's mutual exclusion and the ledger's uniqueness constraint are
//! only as strong as the backend's conditional-write guarantee, so the
//! precondition semantics here are the load-bearing part of the contract.
//!
//! ## Version tokens
//!
//! The version token is an opaque `String` so different backends can
//! plug in their native notion of document version (numeric generation,
//! `ETag`, revision id) without leaking it into the engine.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Precondition for conditional writes (CAS operations).
///
/// The version token is opaque - backends interpret it according to their
/// own semantics.
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// Write only if the document does not exist.
    DoesNotExist,
    /// Write only if the document's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
#[derive(Debug, Clone)]
pub enum WriteResult {
    /// Write succeeded, returns new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns current version token.
    PreconditionFailed {
        /// The current version that caused the precondition to fail.
        current_version: String,
    },
}

/// Metadata about a stored document.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Document path (key).
    pub path: String,
    /// Document size in bytes.
    pub size: u64,
    /// Document version token for CAS operations.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait for the migration state store.
///
/// All backends (real document stores, the in-memory test double)
/// implement this trait. The contract is designed so a single conditional
/// write is the unit of atomicity; the engine never assumes multi-document
/// transactions.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads an entire document.
    ///
    /// Returns `Error::NotFound` if the document doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes with an optional precondition.
    ///
    /// Returns `WriteResult::PreconditionFailed` if the precondition is not
    /// met. Never returns an error for precondition failure - that is a
    /// normal result.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes a document.
    ///
    /// Succeeds even if the document doesn't exist (idempotent).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists documents with the given prefix.
    ///
    /// Returns an empty vec if no documents match.
    ///
    /// **Ordering**: Results are returned in arbitrary order that may vary
    /// between backends and invocations. Callers requiring deterministic
    /// order should sort the results.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets document metadata without reading content.
    ///
    /// Returns `None` if the document doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;
}

/// In-memory storage backend for testing.
///
/// Thread-safe via `RwLock`. Not suitable for production.
/// Uses numeric versions internally (stored as strings).
#[derive(Debug, Default)]
pub struct MemoryBackend {
    documents: Arc<RwLock<HashMap<String, StoredDocument>>>,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    data: Bytes,
    /// Numeric version stored as i64 internally, exposed as String via API.
    version: i64,
    last_modified: DateTime<Utc>,
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let documents = self.documents.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        documents
            .get(path)
            .map(|d| d.data.clone())
            .ok_or_else(|| Error::NotFound(format!("document not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut documents = self.documents.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let current = documents.get(path);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(doc) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: doc.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match current {
                    Some(doc) if doc.version != expected_num => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: doc.version.to_string(),
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: "0".to_string(),
                        });
                    }
                    _ => {}
                }
            }
            WritePrecondition::None => {}
        }

        let new_version = current.map_or(1, |d| d.version + 1);
        documents.insert(
            path.to_string(),
            StoredDocument {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );
        drop(documents);

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.documents
            .write()
            .map_err(|_| Error::Internal {
                message: "lock poisoned".into(),
            })?
            .remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let documents = self.documents.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        Ok(documents
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, doc)| ObjectMeta {
                path: path.clone(),
                size: doc.data.len() as u64,
                version: doc.version.to_string(),
                last_modified: Some(doc.last_modified),
            })
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let documents = self.documents.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        Ok(documents.get(path).map(|doc| ObjectMeta {
            path: path.to_string(),
            size: doc.data.len() as u64,
            version: doc.version.to_string(),
            last_modified: Some(doc.last_modified),
        }))
    }
}
