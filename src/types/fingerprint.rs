//! The `Fingerprint` newtype: 128 lowercase-hex characters, the SHA3-512 of
//! an identity's signing and encryption public keys (spec 3).
//!
//! Grounded in the teacher's `types::DevicePubkey`/`Seed` pattern of a thin
//! newtype over a fixed-size byte buffer with `to_hex`/`from_hex`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("fingerprint must be exactly {expected} hex characters, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("fingerprint contains non-hex characters")]
    NotHex,
}

impl Fingerprint {
    pub fn parse(s: &str) -> Result<Self, FingerprintError> {
        if s.len() != crate::crypto::FINGERPRINT_HEX_LEN {
            return Err(FingerprintError::WrongLength {
                expected: crate::crypto::FINGERPRINT_HEX_LEN,
                got: s.len(),
            });
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(FingerprintError::NotHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        assert!(Fingerprint::parse("abcd").is_err());
    }

    #[test]
    fn rejects_non_hex() {
        let bad = "g".repeat(128);
        assert!(Fingerprint::parse(&bad).is_err());
    }

    #[test]
    fn accepts_valid() {
        let good = "a".repeat(128);
        assert!(Fingerprint::parse(&good).is_ok());
    }
}
