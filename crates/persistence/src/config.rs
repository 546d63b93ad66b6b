//! Persistence configuration: recognised options and their
//! environment-variable overrides.

use loomflow_scheduler::SuspensionKeyFormat;

use crate::compress::COMPRESSION_THRESHOLD;

/// Default ceiling on a captured state's serialized size before
/// [`crate::pipeline::Persistence::suspend`] refuses it.
pub const DEFAULT_MAX_STATE_BYTES: usize = 100 * 1024 * 1024;

/// Which backend kind to construct. `Custom` means the caller built their
/// own [`crate::backend::StorageBackend`] and config only covers the
/// pipeline around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Filesystem-backed, one file per suspension key.
    Filesystem,
    /// Caller-provided backend; no config-driven construction needed.
    Custom,
}

/// Encryption settings.
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    /// Whether `suspend` encrypts envelopes at all.
    pub enabled: bool,
    /// Always `"AES-256-GCM"` today; recorded for forward compatibility.
    pub algorithm: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self { enabled: false, algorithm: "AES-256-GCM".to_owned() }
    }
}

/// How many times a backend operation is retried, and with what backoff,
/// before the failure is surfaced.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each subsequent attempt.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 100 }
    }
}

/// Top-level persistence configuration.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Which backend kind `environment`-style construction should pick.
    pub backend: BackendKind,
    pub encryption: EncryptionConfig,
    /// How generated suspension keys are shaped.
    pub key_generation: SuspensionKeyFormat,
    pub retry: RetryConfig,
    /// Ceiling on a captured state's serialized size.
    pub max_state_bytes: usize,
    /// Minimum serialized size before compression is applied.
    pub compression_threshold: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Filesystem,
            encryption: EncryptionConfig::default(),
            key_generation: SuspensionKeyFormat::default(),
            retry: RetryConfig::default(),
            max_state_bytes: DEFAULT_MAX_STATE_BYTES,
            compression_threshold: COMPRESSION_THRESHOLD,
        }
    }
}

impl PersistenceConfig {
    /// Apply the illustrative environment overrides:
    /// `PERSISTENCE_BACKEND`, `ENCRYPTION_ENABLED`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(backend) = std::env::var("PERSISTENCE_BACKEND") {
            self.backend = match backend.as_str() {
                "filesystem" => BackendKind::Filesystem,
                _ => self.backend,
            };
        }
        if let Ok(enabled) = std::env::var("ENCRYPTION_ENABLED") {
            self.encryption.enabled = matches!(enabled.as_str(), "1" | "true" | "TRUE");
        }
        self
    }
}
