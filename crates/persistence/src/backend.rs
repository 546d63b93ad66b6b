//! The storage backend contract: pluggable persistence for
//! [`crate::envelope::PersistedEnvelope`]s, keyed by [`SuspensionKey`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loomflow_error::PersistenceError;
use loomflow_scheduler::SuspensionKey;

use crate::envelope::PersistedEnvelope;

/// A stored suspension's bookkeeping, for `list`.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub key: SuspensionKey,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of a `health` probe.
#[derive(Debug, Clone, Copy)]
pub struct BackendHealth {
    pub healthy: bool,
    pub latency_ms: Option<u64>,
}

/// Which stale suspensions a `cleanup` pass should remove.
#[derive(Debug, Clone, Default)]
pub struct CleanupCriteria {
    /// Remove records created before this instant.
    pub older_than: Option<DateTime<Utc>>,
}

/// A place [`PersistedEnvelope`]s can be stored and later retrieved by
/// their [`SuspensionKey`]. Implementations are assumed thread-safe.
///
/// Backends for a SQL database, a document store, or a key/value store
/// with TTL all implement this same contract; only
/// [`crate::backends::filesystem::FilesystemBackend`] ships here.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn store(&self, key: &SuspensionKey, envelope: &PersistedEnvelope) -> Result<(), PersistenceError>;

    async fn retrieve(&self, key: &SuspensionKey) -> Result<Option<PersistedEnvelope>, PersistenceError>;

    async fn delete(&self, key: &SuspensionKey) -> Result<(), PersistenceError>;

    async fn list(&self, offset: Option<usize>, limit: Option<usize>) -> Result<Vec<StoredRecord>, PersistenceError>;

    async fn health(&self) -> BackendHealth;

    /// Remove records matching `criteria`, returning how many were
    /// deleted. Backends that don't support bulk cleanup may leave this
    /// at the default of "nothing removed".
    async fn cleanup(&self, _criteria: CleanupCriteria) -> Result<usize, PersistenceError> {
        Ok(0)
    }
}
