//! Tower identifiers.
//!
//! Towers are identified by a fixed 8-byte id. The canonical string form is
//! 16 lowercase hex characters with no separators, used in logs and in every
//! payload handed to the host.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Length of a tower id in bytes.
pub const DEVICE_ID_LEN: usize = 8;

/// Length of the hex rendering of a tower id.
pub const DEVICE_ID_HEX_LEN: usize = DEVICE_ID_LEN * 2;

/// Fixed-length tower identity. Equality and hashing are byte-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId([u8; DEVICE_ID_LEN]);

impl DeviceId {
    /// Create from an array, which is always valid.
    pub const fn new(bytes: [u8; DEVICE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a 16-character hex string (either case).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] unless the input is exactly 16 hex characters.
    pub fn parse_hex(s: &str) -> Result<Self> {
        let raw = s.as_bytes();
        if raw.len() != DEVICE_ID_HEX_LEN {
            return Err(Error::invalid_identifier(format!(
                "tower id should be a string with {} hexadecimal characters, got {} bytes",
                DEVICE_ID_HEX_LEN,
                raw.len()
            )));
        }

        let mut bytes = [0u8; DEVICE_ID_LEN];
        for (i, pair) in raw.chunks_exact(2).enumerate() {
            let (Some(hi), Some(lo)) = (nibble(pair[0]), nibble(pair[1])) else {
                return Err(Error::invalid_identifier(format!(
                    "non-hex character near offset {} in tower id",
                    i * 2
                )));
            };
            bytes[i] = (hi << 4) | lo;
        }

        Ok(Self(bytes))
    }

    /// Create from SDK-reported raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] unless exactly 8 bytes are given.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; DEVICE_ID_LEN] = bytes.try_into().map_err(|_| {
            Error::invalid_identifier(format!(
                "tower id should be {} bytes, got {}",
                DEVICE_ID_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Raw id bytes.
    pub fn as_bytes(&self) -> &[u8; DEVICE_ID_LEN] {
        &self.0
    }

    /// Canonical lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

#[inline]
fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_hex(s)
    }
}

impl TryFrom<&[u8]> for DeviceId {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_slice(bytes)
    }
}

impl From<[u8; DEVICE_ID_LEN]> for DeviceId {
    fn from(bytes: [u8; DEVICE_ID_LEN]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for DeviceId {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for DeviceId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_hex(&s).map_err(serde::de::Error::custom)
    }
}
