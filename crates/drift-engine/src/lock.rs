//! The run lock: cross-process mutual exclusion for a migration run.
//!
//! The lock is a single well-known document carrying a `held` flag. State
//! transitions go through conditional writes: a free-to-held flip requires
//! the version observed when the document was read, and a missing document
//! is claimed with a create-if-absent write. Either way, exactly one of
//! any number of concurrent contenders wins.
//!
//! There is no expiry. A crashed holder leaves the lock held until an
//! operator clears the document; waiting runners time out and report that
//! the lock could not be acquired.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use drift_core::storage::{StorageBackend, WritePrecondition, WriteResult};

use crate::error::{EngineError, Result};
use crate::paths;

/// How many times a conditional release write is retried before giving up.
const RELEASE_RETRIES: usize = 3;

/// The persisted lock document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockDocument {
    held: bool,
    holder: Option<String>,
    acquired_at: Option<DateTime<Utc>>,
}

impl LockDocument {
    fn free() -> Self {
        Self {
            held: false,
            holder: None,
            acquired_at: None,
        }
    }

    fn held_by(holder: &str) -> Self {
        Self {
            held: true,
            holder: Some(holder.to_string()),
            acquired_at: Some(Utc::now()),
        }
    }

    fn to_bytes(&self) -> Result<Bytes> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| EngineError::serialization("serialize lock document", &e))?;
        Ok(Bytes::from(bytes))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| EngineError::serialization("parse lock document", &e))
    }
}

/// Handle on the run lock for one database.
///
/// Each handle carries its own holder id; release only frees a lock this
/// handle acquired.
pub struct RunLock {
    storage: Arc<dyn StorageBackend>,
    path: String,
    holder_id: String,
}

impl RunLock {
    /// Creates a lock handle with a fresh holder id.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        database: &str,
        collection: &str,
    ) -> Self {
        Self {
            storage,
            path: paths::lock_document(database, collection),
            holder_id: Ulid::new().to_string(),
        }
    }

    /// Returns this handle's holder id.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Provisions the lock document in the free state (idempotent).
    ///
    /// An existing document, whatever its state, is left untouched.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the store is unreachable.
    pub async fn initialize(&self) -> Result<()> {
        let free = LockDocument::free().to_bytes()?;
        match self
            .storage
            .put(&self.path, free, WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => {
                tracing::debug!(path = %self.path, "lock document created");
            }
            WriteResult::PreconditionFailed { .. } => {}
        }
        Ok(())
    }

    /// Attempts a single acquisition.
    ///
    /// Returns `Ok(true)` when this handle now holds the lock, `Ok(false)`
    /// when another holder does (or a concurrent contender won the race).
    ///
    /// # Errors
    ///
    /// Returns a connection error if the store is unreachable.
    pub async fn try_acquire(&self) -> Result<bool> {
        let held_doc = LockDocument::held_by(&self.holder_id).to_bytes()?;

        let Some(meta) = self.storage.head(&self.path).await? else {
            // No document yet: claim it with create-if-absent
            return match self
                .storage
                .put(&self.path, held_doc, WritePrecondition::DoesNotExist)
                .await?
            {
                WriteResult::Success { .. } => {
                    tracing::debug!(holder = %self.holder_id, "run lock acquired (created)");
                    Ok(true)
                }
                WriteResult::PreconditionFailed { .. } => Ok(false),
            };
        };

        let current = LockDocument::from_bytes(&self.storage.get(&self.path).await?)?;
        if current.held {
            return Ok(false);
        }

        match self
            .storage
            .put(
                &self.path,
                held_doc,
                WritePrecondition::MatchesVersion(meta.version),
            )
            .await?
        {
            WriteResult::Success { .. } => {
                tracing::debug!(holder = %self.holder_id, "run lock acquired");
                Ok(true)
            }
            WriteResult::PreconditionFailed { .. } => Ok(false),
        }
    }

    /// Acquires the lock, polling until `max_wait` elapses.
    ///
    /// A zero `max_wait` means a single attempt and no sleeping. Returns
    /// `Ok(false)` when the wait time is exhausted without acquiring.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the store is unreachable.
    pub async fn acquire_with_wait(
        &self,
        poll_rate: Duration,
        max_wait: Duration,
    ) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            if self.try_acquire().await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tracing::info!(
                path = %self.path,
                poll_rate_secs = poll_rate.as_secs(),
                "run lock is held, waiting"
            );
            tokio::time::sleep_until(deadline.min(tokio::time::Instant::now() + poll_rate)).await;
        }
    }

    /// Releases the lock if this handle holds it.
    ///
    /// Idempotent: a missing document, an already-free lock, or a lock held
    /// by someone else (logged) all release cleanly without a write.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the store is unreachable or the
    /// conditional free write keeps losing races.
    pub async fn release(&self) -> Result<()> {
        for _ in 0..RELEASE_RETRIES {
            let Some(meta) = self.storage.head(&self.path).await? else {
                tracing::warn!(path = %self.path, "lock document missing at release");
                return Ok(());
            };

            let current = LockDocument::from_bytes(&self.storage.get(&self.path).await?)?;
            if !current.held {
                return Ok(());
            }
            if current.holder.as_deref() != Some(self.holder_id.as_str()) {
                tracing::warn!(
                    holder = ?current.holder,
                    expected = %self.holder_id,
                    "lock held by another holder at release, leaving it"
                );
                return Ok(());
            }

            match self
                .storage
                .put(
                    &self.path,
                    LockDocument::free().to_bytes()?,
                    WritePrecondition::MatchesVersion(meta.version),
                )
                .await?
            {
                WriteResult::Success { .. } => {
                    tracing::debug!(holder = %self.holder_id, "run lock released");
                    return Ok(());
                }
                WriteResult::PreconditionFailed { .. } => {
                    // Document changed under us; re-read and re-decide
                }
            }
        }

        Err(EngineError::Connection {
            message: format!(
                "could not release run lock at '{}' after {RELEASE_RETRIES} attempts",
                self.path
            ),
            source: None,
        })
    }

    /// Returns whether the lock is currently held by anyone.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the store is unreachable.
    pub async fn is_held(&self) -> Result<bool> {
        match self.storage.head(&self.path).await? {
            None => Ok(false),
            Some(_) => {
                let doc = LockDocument::from_bytes(&self.storage.get(&self.path).await?)?;
                Ok(doc.held)
            }
        }
    }
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock")
            .field("path", &self.path)
            .field("holder_id", &self.holder_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::MemoryBackend;

    fn lock(storage: &Arc<MemoryBackend>) -> RunLock {
        RunLock::new(
            Arc::clone(storage) as Arc<dyn StorageBackend>,
            "orders-db",
            "migration_lock",
        )
    }

    #[tokio::test]
    async fn initialize_leaves_a_held_lock_alone() {
        let storage = Arc::new(MemoryBackend::new());
        let holder = lock(&storage);
        let other = lock(&storage);

        other.initialize().await.expect("first init");
        assert!(!other.is_held().await.expect("is_held"));

        assert!(holder.try_acquire().await.expect("acquire"));
        other.initialize().await.expect("init while held");
        assert!(other.is_held().await.expect("still held"));
    }

    #[tokio::test]
    async fn acquire_creates_the_document() {
        let storage = Arc::new(MemoryBackend::new());
        let lock = lock(&storage);

        assert!(!lock.is_held().await.expect("is_held"));
        assert!(lock.try_acquire().await.expect("acquire"));
        assert!(lock.is_held().await.expect("is_held"));
    }

    #[tokio::test]
    async fn second_contender_is_refused() {
        let storage = Arc::new(MemoryBackend::new());
        let first = lock(&storage);
        let second = lock(&storage);

        assert!(first.try_acquire().await.expect("first acquire"));
        assert!(!second.try_acquire().await.expect("second acquire"));
    }

    #[tokio::test]
    async fn release_frees_for_the_next_holder() {
        let storage = Arc::new(MemoryBackend::new());
        let first = lock(&storage);
        let second = lock(&storage);

        assert!(first.try_acquire().await.expect("acquire"));
        first.release().await.expect("release");
        assert!(!first.is_held().await.expect("is_held"));
        assert!(second.try_acquire().await.expect("reacquire"));
    }

    #[tokio::test]
    async fn release_without_holding_is_a_no_op() {
        let storage = Arc::new(MemoryBackend::new());
        let holder = lock(&storage);
        let bystander = lock(&storage);

        // Nothing exists yet
        bystander.release().await.expect("release on missing");

        assert!(holder.try_acquire().await.expect("acquire"));
        bystander.release().await.expect("release by non-holder");
        // Still held by the real holder
        assert!(holder.is_held().await.expect("is_held"));
        assert!(!bystander.try_acquire().await.expect("still refused"));
    }

    #[tokio::test]
    async fn reacquire_after_release_reuses_the_document() {
        let storage = Arc::new(MemoryBackend::new());
        let lock = lock(&storage);

        assert!(lock.try_acquire().await.expect("acquire"));
        lock.release().await.expect("release");
        assert!(lock.try_acquire().await.expect("reacquire"));
        lock.release().await.expect("release again");
    }

    #[tokio::test]
    async fn zero_wait_makes_a_single_attempt() {
        let storage = Arc::new(MemoryBackend::new());
        let first = lock(&storage);
        let second = lock(&storage);

        assert!(first.try_acquire().await.expect("acquire"));
        let acquired = second
            .acquire_with_wait(Duration::from_millis(5), Duration::ZERO)
            .await
            .expect("acquire_with_wait");
        assert!(!acquired);
    }

    #[tokio::test]
    async fn waiting_acquires_once_the_lock_frees() {
        let storage = Arc::new(MemoryBackend::new());
        let first = lock(&storage);
        let second = lock(&storage);

        assert!(first.try_acquire().await.expect("acquire"));

        let waiter = tokio::spawn({
            let storage = Arc::clone(&storage);
            async move {
                let lock = RunLock::new(
                    storage as Arc<dyn StorageBackend>,
                    "orders-db",
                    "migration_lock",
                );
                lock.acquire_with_wait(Duration::from_millis(5), Duration::from_secs(5))
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.release().await.expect("release");

        let acquired = waiter.await.expect("join").expect("acquire_with_wait");
        assert!(acquired);
        assert!(second.is_held().await.expect("is_held"));
    }

    #[tokio::test]
    async fn wait_exhaustion_returns_false() {
        let storage = Arc::new(MemoryBackend::new());
        let first = lock(&storage);
        let second = lock(&storage);

        assert!(first.try_acquire().await.expect("acquire"));
        let acquired = second
            .acquire_with_wait(Duration::from_millis(5), Duration::from_millis(30))
            .await
            .expect("acquire_with_wait");
        assert!(!acquired);
    }

    #[tokio::test]
    async fn lock_document_is_camel_case() {
        let doc = LockDocument::held_by("01H");
        let json = serde_json::to_value(&doc).expect("serialize");
        assert_eq!(json.get("held"), Some(&serde_json::json!(true)));
        assert!(json.get("acquiredAt").is_some());
        assert!(json.get("holder").is_some());
    }
}
