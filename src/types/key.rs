//! WireGuard key type
//!
//! Keys are 32 raw bytes. They display and parse as standard base64 (the
//! wg(8) convention) and travel as lowercase hex on the userspace socket.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a WireGuard key in bytes
pub const KEY_LEN: usize = 32;

/// A 32-byte WireGuard key (private, public or preshared)
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Key([u8; KEY_LEN]);

/// Error returned when a key string cannot be decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid key: {reason}")]
pub struct ParseKeyError {
    reason: String,
}

impl Key {
    /// Wrap raw key bytes
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, which must be exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseKeyError> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| ParseKeyError {
            reason: format!("expected {} bytes, got {}", KEY_LEN, bytes.len()),
        })?;
        Ok(Self(bytes))
    }

    /// Decode a lowercase or uppercase hex key
    pub fn from_hex(value: &str) -> Result<Self, ParseKeyError> {
        let bytes = hex::decode(value).map_err(|e| ParseKeyError {
            reason: e.to_string(),
        })?;
        Self::from_slice(&bytes)
    }

    /// Encode as lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw key bytes
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// The all-zero key, used by backends to mean "unset"
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; KEY_LEN]
    }
}

impl From<[u8; KEY_LEN]> for Key {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Key {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64.decode(s.trim()).map_err(|e| ParseKeyError {
            reason: e.to_string(),
        })?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE64.encode(self.0))
    }
}

// Never print key material through Debug
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            f.write_str("Key(<zero>)")
        } else {
            f.write_str("Key(<redacted>)")
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
