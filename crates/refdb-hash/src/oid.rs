use std::fmt;
use std::str::FromStr;

use crate::HashError;

/// Length of an object id in raw bytes.
pub const RAW_LENGTH: usize = 20;

/// Length of an object id in hex characters.
pub const HEX_LENGTH: usize = RAW_LENGTH * 2;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// A git object identifier: the 20-byte hash of an object's content.
///
/// Equality is bytewise; the canonical text form is 40 lowercase hex
/// characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; RAW_LENGTH]);

impl ObjectId {
    /// The null id (all zeros), used for "no value" sides of a change.
    pub const ZERO: Self = Self([0u8; RAW_LENGTH]);

    /// Create an ObjectId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != RAW_LENGTH {
            return Err(HashError::InvalidHashLength {
                expected: RAW_LENGTH,
                actual: bytes.len(),
            });
        }
        let mut raw = [0u8; RAW_LENGTH];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Create an ObjectId from a 40-character hex string. Mixed case is
    /// accepted.
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let hex = hex.as_bytes();
        if hex.len() != HEX_LENGTH {
            return Err(HashError::InvalidHexLength {
                expected: HEX_LENGTH,
                actual: hex.len(),
            });
        }
        let mut raw = [0u8; RAW_LENGTH];
        for (i, byte) in raw.iter_mut().enumerate() {
            let hi = nibble(hex[i * 2]).ok_or(HashError::InvalidHex {
                position: i * 2,
                character: hex[i * 2] as char,
            })?;
            let lo = nibble(hex[i * 2 + 1]).ok_or(HashError::InvalidHex {
                position: i * 2 + 1,
                character: hex[i * 2 + 1] as char,
            })?;
            *byte = (hi << 4) | lo;
        }
        Ok(Self(raw))
    }

    /// Get the raw bytes of the hash.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check if this is the null (all-zeros) id.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Get the hex string representation (lowercase).
    pub fn to_hex(&self) -> String {
        let mut hex = [0u8; HEX_LENGTH];
        for (i, &b) in self.0.iter().enumerate() {
            hex[i * 2] = HEX_DIGITS[(b >> 4) as usize];
            hex[i * 2 + 1] = HEX_DIGITS[(b & 0x0f) as usize];
        }
        // SAFETY: only ASCII hex digits were written above.
        unsafe { String::from_utf8_unchecked(hex.to_vec()) }
    }
}

fn nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..8])
    }
}

impl FromStr for ObjectId {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
