//! `serialize -> compress -> encrypt -> store`, and its inverse on resume.
//! This is the one place all four stages are wired together; each
//! stage itself lives in its own module so it can be tested in isolation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use loomflow_error::{EncryptionError, EngineError, PersistenceError, PersistenceErrorKind};
use loomflow_scheduler::{SuspensionKey, SuspensionRecord};
use sha2::{Digest, Sha256};

use crate::backend::{BackendHealth, CleanupCriteria, StorageBackend, StoredRecord};
use crate::compress::{compress, decompress};
use crate::config::{PersistenceConfig, RetryConfig};
use crate::crypto::Keyring;
use crate::envelope::{PersistedEnvelope, ENVELOPE_VERSION};

/// The suspend/resume pipeline: owns a backend, a config, and (if
/// encryption is enabled) a keyring.
pub struct Persistence {
    backend: Arc<dyn StorageBackend>,
    config: PersistenceConfig,
    keyring: Option<Keyring>,
}

impl Persistence {
    /// `keyring` is required iff `config.encryption.enabled`; this is
    /// checked lazily, the first time a suspend/resume actually needs it,
    /// not at construction.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, config: PersistenceConfig, keyring: Option<Keyring>) -> Self {
        Self { backend, config, keyring }
    }

    /// Seal `record`, generate a fresh key, and store it. Returns the key
    /// a caller needs to later `resume`.
    pub async fn suspend(&self, record: &SuspensionRecord) -> Result<SuspensionKey, EngineError> {
        let envelope = self.seal(record)?;
        let key = SuspensionKey::generate(&self.config.key_generation, Utc::now());
        let backend = Arc::clone(&self.backend);
        with_backend_retry(&self.config.retry, || {
            let backend = Arc::clone(&backend);
            let key = key.clone();
            let envelope = envelope.clone();
            async move { backend.store(&key, &envelope).await }
        })
        .await?;
        tracing::info!(execution_id = %record.execution_id, key = key.as_str(), "execution suspended");
        Ok(key)
    }

    /// Parse `raw_key`, fetch its envelope, and reconstitute the
    /// [`SuspensionRecord`] it holds.
    pub async fn resume(&self, raw_key: &str) -> Result<SuspensionRecord, EngineError> {
        let key = SuspensionKey::parse(raw_key, &self.config.key_generation)?;
        let backend = Arc::clone(&self.backend);
        let envelope = with_backend_retry(&self.config.retry, || {
            let backend = Arc::clone(&backend);
            let key = key.clone();
            async move { backend.retrieve(&key).await }
        })
        .await?;
        let envelope = envelope.ok_or_else(|| PersistenceError {
            kind: PersistenceErrorKind::NotFound,
            message: format!("no suspension found for key '{raw_key}'"),
        })?;
        let record = self.open(&envelope)?;
        tracing::info!(execution_id = %record.execution_id, "execution resumed");
        Ok(record)
    }

    /// Parse `raw_key` and delete its envelope, if present.
    pub async fn delete(&self, raw_key: &str) -> Result<(), EngineError> {
        let key = SuspensionKey::parse(raw_key, &self.config.key_generation)?;
        let backend = Arc::clone(&self.backend);
        with_backend_retry(&self.config.retry, || {
            let backend = Arc::clone(&backend);
            let key = key.clone();
            async move { backend.delete(&key).await }
        })
        .await
        .map_err(Into::into)
    }

    /// List stored suspensions, oldest first.
    pub async fn list_suspended(&self, offset: Option<usize>, limit: Option<usize>) -> Result<Vec<StoredRecord>, EngineError> {
        self.backend.list(offset, limit).await.map_err(Into::into)
    }

    /// Remove suspensions matching `criteria`, returning how many were
    /// deleted.
    pub async fn cleanup_suspended(&self, criteria: CleanupCriteria) -> Result<usize, EngineError> {
        self.backend.cleanup(criteria).await.map_err(Into::into)
    }

    /// Probe the backend's health directly (no retry: this *is* the
    /// health check).
    pub async fn health(&self) -> BackendHealth {
        self.backend.health().await
    }

    fn seal(&self, record: &SuspensionRecord) -> Result<PersistedEnvelope, EngineError> {
        let json = serde_json::to_vec(record).map_err(|e| PersistenceError::corrupted(e.to_string()))?;
        let size = json.len();
        if size > self.config.max_state_bytes {
            return Err(PersistenceError::state_too_large(size, self.config.max_state_bytes).into());
        }
        let checksum = hex::encode(Sha256::digest(&json));

        let compressed = size >= self.config.compression_threshold;
        let mut payload = if compressed { compress(&json).map_err(|e| PersistenceError::corrupted(e.to_string()))? } else { json };

        let encryption = if self.config.encryption.enabled {
            let keyring =
                self.keyring.as_ref().ok_or_else(|| EncryptionError("encryption is enabled but no keyring is configured".into()))?;
            let (ciphertext, metadata) = keyring.encrypt(&payload)?;
            payload = ciphertext;
            Some(metadata)
        } else {
            None
        };

        Ok(PersistedEnvelope {
            version: ENVELOPE_VERSION.to_owned(),
            serialized_at: Utc::now(),
            size,
            checksum,
            compressed,
            encryption,
            data: BASE64.encode(payload),
        })
    }

    fn open(&self, envelope: &PersistedEnvelope) -> Result<SuspensionRecord, EngineError> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(PersistenceError {
                kind: PersistenceErrorKind::UnsupportedVersion,
                message: format!("envelope version '{}' is not supported", envelope.version),
            }
            .into());
        }

        let mut payload = BASE64.decode(&envelope.data).map_err(|e| PersistenceError::corrupted(e.to_string()))?;

        if let Some(metadata) = &envelope.encryption {
            let keyring =
                self.keyring.as_ref().ok_or_else(|| EncryptionError("envelope is encrypted but no keyring is configured".into()))?;
            payload = keyring.decrypt(&payload, metadata)?;
        }

        if envelope.compressed {
            payload = decompress(&payload).map_err(|e| PersistenceError::corrupted(e.to_string()))?;
        }

        let checksum = hex::encode(Sha256::digest(&payload));
        if checksum != envelope.checksum {
            return Err(PersistenceError::corrupted("checksum does not match the stored envelope").into());
        }

        serde_json::from_slice(&payload).map_err(|e| PersistenceError::corrupted(e.to_string()).into())
    }
}

/// Retry a backend operation with exponential backoff. Only
/// [`PersistenceErrorKind::BackendUnavailable`] is retried; corruption,
/// missing records, and unsupported versions are never transient.
async fn with_backend_retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, PersistenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PersistenceError>>,
{
    let mut attempt = 1;
    let mut delay = Duration::from_millis(config.base_delay_ms);
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let retryable = matches!(error.kind, PersistenceErrorKind::BackendUnavailable);
                if attempt >= config.max_attempts || !retryable {
                    return Err(error);
                }
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::FilesystemBackend;
    use crate::config::EncryptionConfig;
    use crate::crypto::KeySource;
    use loomflow_core::{ExecutionId, NodeId};
    use loomflow_scheduler::{ExecutionPosition, SuspensionContext};
    use loomflow_state::StateStore;

    fn sample_record() -> SuspensionRecord {
        SuspensionRecord {
            execution_id: ExecutionId::v4(),
            step_id: NodeId::from("n1"),
            execution_position: ExecutionPosition { node_id: NodeId::from("n1"), kind: "tool".into() },
            variables: StateStore::new().snapshot(),
            per_node_output: std::collections::HashMap::new(),
            metadata: None,
            captured_at: Utc::now(),
            suspension_context: SuspensionContext { tool_id: "ask".into(), timeout_ms: None, awaiting_input_schema: None, default_value: None, metadata: None },
        }
    }

    #[tokio::test]
    async fn suspend_then_resume_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
        let persistence = Persistence::new(backend, PersistenceConfig::default(), None);

        let record = sample_record();
        let key = persistence.suspend(&record).await.unwrap();
        let resumed = persistence.resume(key.as_str()).await.unwrap();
        assert_eq!(resumed.step_id, record.step_id);
    }

    #[tokio::test]
    async fn encrypted_round_trip_requires_matching_keyring() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
        let mut config = PersistenceConfig::default();
        config.encryption = EncryptionConfig { enabled: true, algorithm: "AES-256-GCM".into() };
        let keyring = Keyring::single(&KeySource::Raw([9u8; 32]));
        let persistence = Persistence::new(backend, config, Some(keyring));

        let record = sample_record();
        let key = persistence.suspend(&record).await.unwrap();
        let resumed = persistence.resume(key.as_str()).await.unwrap();
        assert_eq!(resumed.step_id, record.step_id);
    }

    #[tokio::test]
    async fn resume_with_a_malformed_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
        let persistence = Persistence::new(backend, PersistenceConfig::default(), None);
        assert!(persistence.resume("not-a-real-key").await.is_err());
    }

    #[tokio::test]
    async fn resume_of_unknown_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
        let persistence = Persistence::new(backend, PersistenceConfig::default(), None);
        let phantom = SuspensionKey::generate(&persistence.config.key_generation, Utc::now());
        assert!(persistence.resume(phantom.as_str()).await.is_err());
    }
}
