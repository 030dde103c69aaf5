//! The locally owned `Identity`: signing + encryption keypairs and the
//! fingerprint derived from them (spec 3).

use crate::crypto::{EncryptionKeypair, SigningKeypair};
use crate::types::fingerprint::Fingerprint;

/// A locally owned identity. Holds both secret keypairs in memory only while
/// loaded (spec 4.5: `load_identity` loads keys into memory; `destroy()`
/// zeroes them). Never serialized as a whole — see `storage::keys` for how
/// the two secret keys are persisted separately with `0600` permissions.
pub struct Identity {
    pub fingerprint: Fingerprint,
    pub signing: SigningKeypair,
    pub encryption: EncryptionKeypair,
}

impl Identity {
    /// Create an identity from two independently generated 32-byte seeds
    /// (spec 3: "Created by generating two 32-byte seeds (independently, or
    /// via BIP39 mnemonic + optional passphrase -> HKDF expansion)").
    pub fn from_seeds(
        signing_seed: &[u8; 32],
        encryption_seed: &[u8; 32],
    ) -> Result<Self, crate::crypto::CryptoError> {
        let signing = SigningKeypair::generate_from_seed(signing_seed)?;
        let encryption = EncryptionKeypair::generate_from_seed(encryption_seed)?;
        let fingerprint_hex =
            crate::crypto::primitives::derive_fingerprint(signing.public_key(), encryption.public_key());
        let fingerprint =
            Fingerprint::parse(&fingerprint_hex).expect("derived fingerprint is always well-formed");
        Ok(Self {
            fingerprint,
            signing,
            encryption,
        })
    }
}
