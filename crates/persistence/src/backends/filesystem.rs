//! A filesystem-backed [`StorageBackend`]: one JSON file per suspension
//! key under a base directory.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use loomflow_error::{PersistenceError, PersistenceErrorKind};
use loomflow_scheduler::SuspensionKey;
use tokio::fs;

use crate::backend::{BackendHealth, CleanupCriteria, StorageBackend, StoredRecord};
use crate::envelope::PersistedEnvelope;

/// Stores one envelope per file, named after the suspension key.
pub struct FilesystemBackend {
    base_dir: PathBuf,
}

impl FilesystemBackend {
    /// Use `base_dir` for storage, creating it if it doesn't exist yet.
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await.map_err(|e| backend_unavailable(format!("creating {}: {e}", base_dir.display())))?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, key: &SuspensionKey) -> PathBuf {
        self.base_dir.join(format!("{}.json", key.as_str()))
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn store(&self, key: &SuspensionKey, envelope: &PersistedEnvelope) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        let body = serde_json::to_vec(envelope).map_err(|e| PersistenceError::corrupted(format!("encoding envelope: {e}")))?;
        fs::write(&path, body).await.map_err(|e| backend_unavailable(format!("writing {}: {e}", path.display())))
    }

    async fn retrieve(&self, key: &SuspensionKey) -> Result<Option<PersistedEnvelope>, PersistenceError> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(body) => {
                let envelope = serde_json::from_slice(&body).map_err(|e| PersistenceError::corrupted(format!("decoding envelope: {e}")))?;
                Ok(Some(envelope))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(backend_unavailable(format!("reading {}: {e}", path.display()))),
        }
    }

    async fn delete(&self, key: &SuspensionKey) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(backend_unavailable(format!("deleting {}: {e}", path.display()))),
        }
    }

    async fn list(&self, offset: Option<usize>, limit: Option<usize>) -> Result<Vec<StoredRecord>, PersistenceError> {
        let mut entries = fs::read_dir(&self.base_dir).await.map_err(|e| backend_unavailable(format!("listing {}: {e}", self.base_dir.display())))?;

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| backend_unavailable(e.to_string()))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = stem_key(&path) else { continue };
            let body = fs::read(&path).await.map_err(|e| backend_unavailable(e.to_string()))?;
            let envelope: PersistedEnvelope = serde_json::from_slice(&body).map_err(|e| PersistenceError::corrupted(e.to_string()))?;
            records.push(StoredRecord { key: stem, created_at: envelope.serialized_at, expires_at: None });
        }
        records.sort_by_key(|r| r.created_at);

        let offset = offset.unwrap_or(0);
        let records: Vec<_> = records.into_iter().skip(offset).collect();
        Ok(match limit {
            Some(limit) => records.into_iter().take(limit).collect(),
            None => records,
        })
    }

    async fn health(&self) -> BackendHealth {
        let started = Instant::now();
        let healthy = fs::metadata(&self.base_dir).await.is_ok();
        BackendHealth { healthy, latency_ms: Some(started.elapsed().as_millis() as u64) }
    }

    async fn cleanup(&self, criteria: CleanupCriteria) -> Result<usize, PersistenceError> {
        let Some(older_than) = criteria.older_than else { return Ok(0) };
        let stale: Vec<_> = self.list(None, None).await?.into_iter().filter(|r| r.created_at < older_than).collect();
        for record in &stale {
            self.delete(&record.key).await?;
        }
        Ok(stale.len())
    }
}

fn stem_key(path: &Path) -> Option<SuspensionKey> {
    let stem = path.file_stem()?.to_str()?;
    // Filenames are produced by `path_for`, so this always round-trips;
    // construction doesn't re-validate format here, only on `resume`.
    Some(SuspensionKey::from_trusted(stem))
}

fn backend_unavailable(message: impl Into<String>) -> PersistenceError {
    PersistenceError { kind: PersistenceErrorKind::BackendUnavailable, message: message.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loomflow_scheduler::SuspensionKeyFormat;

    fn envelope() -> PersistedEnvelope {
        PersistedEnvelope {
            version: "1.0".into(),
            serialized_at: Utc::now(),
            size: 4,
            checksum: "abcd".into(),
            compressed: false,
            encryption: None,
            data: "dGVzdA==".into(),
        }
    }

    #[tokio::test]
    async fn stores_and_retrieves_an_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        let key = SuspensionKey::generate(&SuspensionKeyFormat::default(), Utc::now());

        backend.store(&key, &envelope()).await.unwrap();
        let fetched = backend.retrieve(&key).await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn retrieving_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        let key = SuspensionKey::generate(&SuspensionKeyFormat::default(), Utc::now());
        assert!(backend.retrieve(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_then_retrieve_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        let key = SuspensionKey::generate(&SuspensionKeyFormat::default(), Utc::now());
        backend.store(&key, &envelope()).await.unwrap();
        backend.delete(&key).await.unwrap();
        assert!(backend.retrieve(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn health_reports_ok_for_an_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        assert!(backend.health().await.healthy);
    }

    #[tokio::test]
    async fn list_returns_every_stored_envelope_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        for _ in 0..3 {
            let key = SuspensionKey::generate(&SuspensionKeyFormat::default(), Utc::now());
            backend.store(&key, &envelope()).await.unwrap();
        }
        let listed = backend.list(None, None).await.unwrap();
        assert_eq!(listed.len(), 3);
    }

    #[tokio::test]
    async fn cleanup_removes_only_records_older_than_the_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        let key = SuspensionKey::generate(&SuspensionKeyFormat::default(), Utc::now());
        backend.store(&key, &envelope()).await.unwrap();

        let removed = backend.cleanup(CleanupCriteria { older_than: Some(Utc::now() - chrono::Duration::days(1)) }).await.unwrap();
        assert_eq!(removed, 0);
        assert!(backend.retrieve(&key).await.unwrap().is_some());

        let removed = backend.cleanup(CleanupCriteria { older_than: Some(Utc::now() + chrono::Duration::days(1)) }).await.unwrap();
        assert_eq!(removed, 1);
        assert!(backend.retrieve(&key).await.unwrap().is_none());
    }
}
