//! BIP39 mnemonic encode/decode and PBKDF2-HMAC-SHA512 seed derivation.
//!
//! Grounded in `InfamousVague-Umbra`'s `crypto/kdf.rs` key-derivation
//! hierarchy diagram (mnemonic -> BIP39 seed -> HKDF-expanded per-purpose
//! keys) and the `bip39` crate usage pattern seen in `RCALabs-mmogit`'s
//! manifest.

use crate::crypto::primitives::{hkdf_expand, CryptoError};
use ::bip39::{Language, Mnemonic};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A 32-byte seed, zeroed on drop. Produced either directly by
/// [`random_bytes`](super::primitives::random_bytes) or by expanding a BIP39
/// mnemonic's 64-byte seed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSeed(pub [u8; 32]);

impl MasterSeed {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Encode a 32-byte seed as a 24-word English BIP39 mnemonic.
///
/// Spec: "24-word English wordlist; checksum per BIP-39". The `bip39` crate
/// computes the checksum bits internally from the 256-bit entropy.
pub fn seed_to_mnemonic(seed: &[u8; 32]) -> Result<String, CryptoError> {
    let mnemonic = Mnemonic::from_entropy_in(Language::English, seed)
        .map_err(|_| CryptoError::InvalidKeySize {
            expected: 32,
            got: seed.len(),
        })?;
    Ok(mnemonic.to_string())
}

/// Derive the 64-byte BIP39 seed from a mnemonic phrase and optional
/// passphrase via PBKDF2-HMAC-SHA512, 2048 iterations (spec 6).
pub fn mnemonic_to_bip39_seed(mnemonic: &str, passphrase: &str) -> Result<[u8; 64], CryptoError> {
    let mnemonic = Mnemonic::parse_in(Language::English, mnemonic).map_err(|_| {
        CryptoError::InvalidKeySize {
            expected: 24,
            got: mnemonic.split_whitespace().count(),
        }
    })?;
    Ok(mnemonic.to_seed(passphrase))
}

/// Recover the original 256-bit entropy ("seed" in spec terms) that a
/// mnemonic was created from. This is the inverse of [`seed_to_mnemonic`],
/// used by the testable property `bip39_seed(mnemonic(seed)) == seed`.
pub fn mnemonic_to_entropy(mnemonic: &str) -> Result<[u8; 32], CryptoError> {
    let mnemonic = Mnemonic::parse_in(Language::English, mnemonic).map_err(|_| {
        CryptoError::InvalidKeySize {
            expected: 24,
            got: mnemonic.split_whitespace().count(),
        }
    })?;
    let entropy = mnemonic.to_entropy();
    if entropy.len() != 32 {
        return Err(CryptoError::InvalidKeySize {
            expected: 32,
            got: entropy.len(),
        });
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&entropy);
    Ok(out)
}

/// Expand a mnemonic (+ optional passphrase) into the two independent
/// 32-byte seeds used for the signing and encryption keypairs, mirroring
/// `polykit`'s "HKDF-SHA3-256(master_seed, app-context)" hierarchy: the
/// 64-byte BIP39 seed is the input key material, "dna:signing-seed" and
/// "dna:encryption-seed" are the per-purpose HKDF `info` strings.
pub fn derive_identity_seeds(
    mnemonic: &str,
    passphrase: &str,
) -> Result<(MasterSeed, MasterSeed), CryptoError> {
    let bip39_seed = mnemonic_to_bip39_seed(mnemonic, passphrase)?;
    let signing: [u8; 32] = hkdf_expand(&bip39_seed, b"", b"dna:signing-seed")?;
    let encryption: [u8; 32] = hkdf_expand(&bip39_seed, b"", b"dna:encryption-seed")?;
    Ok((MasterSeed(signing), MasterSeed(encryption)))
}
