//! Suspend/resume control: the opaque [`SuspensionKey`] and the
//! [`SuspensionRecord`] a tool-initiated suspension captures.

use std::fmt;

use chrono::{DateTime, Utc};
use loomflow_core::{ExecutionId, NodeId};
use loomflow_error::KeyError;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Context a suspending tool attaches, carried through to the resumption
/// caller so a host UI knows what input is expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionContext {
    /// The tool that requested suspension.
    pub tool_id: String,
    /// How long the suspension may remain outstanding before it expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// The JSON schema the resume input is expected to satisfy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awaiting_input_schema: Option<serde_json::Value>,
    /// Used if the suspension expires before a resume arrives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    /// Free-form metadata the tool wants preserved across the pause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Where execution paused: the node that requested the suspension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPosition {
    /// The suspending node's id.
    pub node_id: NodeId,
    /// Its kind (`tool`, `conditional`, ...).
    pub kind: String,
}

/// A captured snapshot of a paused flow, ready to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionRecord {
    /// The execution this suspension belongs to.
    pub execution_id: ExecutionId,
    /// The flow step (node) that was in flight.
    pub step_id: NodeId,
    /// Exactly where in the IR execution paused.
    pub execution_position: ExecutionPosition,
    /// The variable store, captured at the moment of suspension.
    pub variables: loomflow_state::StateSnapshot,
    /// Every node output recorded so far, for downstream `Reference`s.
    pub per_node_output: std::collections::HashMap<NodeId, serde_json::Value>,
    /// Free-form metadata describing the suspension for a host UI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// When this record was captured.
    pub captured_at: DateTime<Utc>,
    /// The suspending tool's own context.
    pub suspension_context: SuspensionContext,
}

/// Opaque, URL-safe identifier for a persisted [`SuspensionRecord`].
///
/// Structure: `[prefix]_[base36(timestamp)]_[encoded(random>=128 bits)]_[checksum6]`.
/// Prefix and checksum presence are fixed per engine instance (an instance
/// either always includes a prefix or never does), so [`SuspensionKeyFormat`]
/// is supplied once, at generation and validation time, rather than
/// round-tripped through the key itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuspensionKey(String);

/// How a [`SuspensionKey`] is generated and validated for this engine
/// instance — fixed at construction, not per-key.
#[derive(Debug, Clone)]
pub struct SuspensionKeyFormat {
    /// Optional literal prefix, e.g. `"loomflow"`.
    pub prefix: Option<String>,
    /// Whether to append the checksum segment.
    pub checksum: bool,
}

impl Default for SuspensionKeyFormat {
    fn default() -> Self {
        Self { prefix: Some("loomflow".into()), checksum: true }
    }
}

const RANDOM_BYTES: usize = 16; // 128 bits

impl SuspensionKey {
    /// Generate a fresh key for `now`, with at least 128 bits of randomness.
    #[must_use]
    pub fn generate(format: &SuspensionKeyFormat, now: DateTime<Utc>) -> Self {
        let timestamp = to_base36(now.timestamp().max(0) as u64);
        let mut random_bytes = [0u8; RANDOM_BYTES];
        rand::thread_rng().fill_bytes(&mut random_bytes);
        let random = hex::encode(random_bytes);

        let mut components = Vec::with_capacity(3);
        if let Some(prefix) = &format.prefix {
            components.push(prefix.clone());
        }
        components.push(timestamp);
        components.push(random);

        if format.checksum {
            let checksum = checksum6(&components.join("_"));
            components.push(checksum);
        }
        Self(components.join("_"))
    }

    /// Borrow the key's opaque string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an already-known-valid key string without re-validating it,
    /// e.g. a filename a storage backend derived from a key this engine
    /// itself generated.
    #[must_use]
    pub fn from_trusted(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Re-parse and validate a key string: component count matches
    /// `format`, the timestamp is sane (after 2020, before 2050), and the
    /// checksum (if present) matches.
    pub fn parse(raw: &str, format: &SuspensionKeyFormat) -> Result<Self, KeyError> {
        let parts: Vec<&str> = raw.split('_').collect();
        let expected_len = 2 + usize::from(format.prefix.is_some()) + usize::from(format.checksum);
        if parts.len() != expected_len {
            return Err(KeyError(format!("expected {expected_len} components, found {}", parts.len())));
        }

        let mut idx = 0;
        if let Some(prefix) = &format.prefix {
            if parts[idx] != prefix {
                return Err(KeyError(format!("expected prefix '{prefix}'")));
            }
            idx += 1;
        }

        let timestamp_part = parts[idx];
        idx += 1;
        let timestamp = from_base36(timestamp_part).ok_or_else(|| KeyError("timestamp is not valid base36".into()))?;
        let year = DateTime::from_timestamp(timestamp as i64, 0).ok_or_else(|| KeyError("timestamp out of range".into()))?.format("%Y").to_string();
        let year: i32 = year.parse().map_err(|_| KeyError("timestamp year unparseable".into()))?;
        if !(2020..2050).contains(&year) {
            return Err(KeyError(format!("timestamp year {year} is out of the sane range 2020-2050")));
        }

        let random_part = parts[idx];
        if hex::decode(random_part).is_err() {
            return Err(KeyError("random segment is not valid hex".into()));
        }
        idx += 1;

        if format.checksum {
            let checksum_part = parts[idx];
            let body = parts[..idx].join("_");
            if checksum_part != checksum6(&body) {
                return Err(KeyError("checksum mismatch".into()));
            }
        }

        Ok(Self(raw.to_owned()))
    }
}

impl fmt::Display for SuspensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn checksum6(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    hex::encode(digest)[..6].to_string()
}

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_ALPHABET[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).expect("base36 alphabet is ASCII")
}

fn from_base36(s: &str) -> Option<u64> {
    let mut value: u64 = 0;
    for c in s.chars() {
        let digit = BASE36_ALPHABET.iter().position(|&b| b == c as u8)? as u64;
        value = value.checked_mul(36)?.checked_add(digit)?;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_round_trips_through_parse() {
        let format = SuspensionKeyFormat::default();
        let key = SuspensionKey::generate(&format, Utc::now());
        assert!(SuspensionKey::parse(key.as_str(), &format).is_ok());
    }

    #[test]
    fn generated_key_has_four_underscore_separated_components() {
        let format = SuspensionKeyFormat::default();
        let key = SuspensionKey::generate(&format, Utc::now());
        assert_eq!(key.as_str().split('_').count(), 4);
    }

    #[test]
    fn parse_rejects_tampered_checksum() {
        let format = SuspensionKeyFormat::default();
        let key = SuspensionKey::generate(&format, Utc::now());
        let mut tampered = key.as_str().to_owned();
        tampered.push('0');
        assert!(SuspensionKey::parse(&tampered, &format).is_err());
    }

    #[test]
    fn parse_rejects_insane_timestamp() {
        let format = SuspensionKeyFormat { prefix: None, checksum: false };
        // base36 "1" => timestamp 1 (1970), well before the 2020 floor.
        assert!(SuspensionKey::parse("1_abcd", &format).is_err());
    }

    #[test]
    fn format_without_prefix_or_checksum_round_trips() {
        let format = SuspensionKeyFormat { prefix: None, checksum: false };
        let key = SuspensionKey::generate(&format, Utc::now());
        assert_eq!(key.as_str().split('_').count(), 2);
        assert!(SuspensionKey::parse(key.as_str(), &format).is_ok());
    }
}
