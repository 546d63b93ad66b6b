//! The on-disk/on-wire shape a suspended execution is reduced to: a
//! versioned, checksummed wrapper around possibly-compressed,
//! possibly-encrypted bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current envelope format version. `Persistence::resume` rejects any
/// other value.
pub const ENVELOPE_VERSION: &str = "1.0";

/// Encryption metadata carried alongside ciphertext so a later process
/// (possibly after key rotation) knows how to undo it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    /// Always `"AES-256-GCM"` for this engine; recorded so a future
    /// algorithm change can still recognise old envelopes.
    pub algorithm: String,
    /// Which key this ciphertext was sealed under.
    pub key_version: u32,
    /// Base64-encoded nonce, unique per encryption.
    pub nonce: String,
}

/// A persisted suspension, ready for a [`crate::backend::StorageBackend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEnvelope {
    /// Envelope format version.
    pub version: String,
    /// When this envelope was produced.
    pub serialized_at: DateTime<Utc>,
    /// Byte length of the serialized (pre-compression) record.
    pub size: usize,
    /// `sha256(serialized record)`, hex-encoded.
    pub checksum: String,
    /// Whether `data` is gzip-compressed (before any encryption).
    pub compressed: bool,
    /// Present iff `data` is encrypted.
    pub encryption: Option<EncryptionMetadata>,
    /// Base64-encoded payload: the serialized record, optionally gzipped,
    /// optionally then AES-256-GCM sealed.
    pub data: String,
}
