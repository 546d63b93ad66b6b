//! AES-256-GCM envelope encryption, with versioned keys so rotation can
//! introduce a new key while old envelopes still decrypt under the
//! version they were sealed with.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use loomflow_error::EncryptionError;
use sha2::{Digest, Sha256};

use crate::envelope::EncryptionMetadata;

const ALGORITHM: &str = "AES-256-GCM";
const NONCE_LEN: usize = 12;

/// Where a 32-byte AES key comes from.
#[derive(Clone)]
pub enum KeySource {
    /// An operator-supplied raw key (e.g. decoded from `ENCRYPTION_KEY`).
    Raw([u8; 32]),
    /// `sha256(seed)`, for local development only. Never use in production:
    /// the key is fully determined by a string the source controls.
    InsecureDevDerived(String),
}

impl KeySource {
    fn resolve(&self) -> [u8; 32] {
        match self {
            Self::Raw(key) => *key,
            Self::InsecureDevDerived(seed) => Sha256::digest(seed.as_bytes()).into(),
        }
    }
}

/// The encryption keys this engine instance knows about, keyed by version.
/// New envelopes always seal under `current_version`; decrypting an
/// envelope looks its `key_version` up here and fails if that version
/// isn't (or is no longer) registered.
pub struct Keyring {
    current_version: u32,
    ciphers: HashMap<u32, Aes256Gcm>,
}

impl Keyring {
    /// A keyring with a single key at version 1.
    #[must_use]
    pub fn single(source: &KeySource) -> Self {
        let mut ciphers = HashMap::new();
        ciphers.insert(1, cipher_for(source));
        Self { current_version: 1, ciphers }
    }

    /// Rotate in a new key as the current version; prior versions remain
    /// registered and can still decrypt.
    pub fn rotate(&mut self, new_version: u32, source: &KeySource) {
        self.ciphers.insert(new_version, cipher_for(source));
        self.current_version = new_version;
    }

    /// Seal `plaintext` under the current key version.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, EncryptionMetadata), EncryptionError> {
        let cipher = self
            .ciphers
            .get(&self.current_version)
            .ok_or_else(|| EncryptionError(format!("no key registered for current version {}", self.current_version)))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut nonce_bytes).map_err(|e| EncryptionError(format!("failed to generate nonce: {e}")))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|e| EncryptionError(format!("encryption failed: {e}")))?;

        Ok((
            ciphertext,
            EncryptionMetadata { algorithm: ALGORITHM.to_owned(), key_version: self.current_version, nonce: BASE64.encode(nonce_bytes) },
        ))
    }

    /// Open ciphertext sealed under `metadata.key_version`.
    pub fn decrypt(&self, ciphertext: &[u8], metadata: &EncryptionMetadata) -> Result<Vec<u8>, EncryptionError> {
        if metadata.algorithm != ALGORITHM {
            return Err(EncryptionError(format!("unsupported algorithm '{}'", metadata.algorithm)));
        }
        let cipher = self
            .ciphers
            .get(&metadata.key_version)
            .ok_or_else(|| EncryptionError(format!("key version {} is not available", metadata.key_version)))?;

        let nonce_bytes = BASE64.decode(&metadata.nonce).map_err(|e| EncryptionError(format!("malformed nonce: {e}")))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        cipher.decrypt(nonce, ciphertext).map_err(|e| EncryptionError(format!("decryption failed: {e}")))
    }
}

fn cipher_for(source: &KeySource) -> Aes256Gcm {
    Aes256Gcm::new_from_slice(&source.resolve()).expect("key is exactly 32 bytes")
}
