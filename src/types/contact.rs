//! A remote identity the local user knows of (spec 3).
//!
//! Grounded in the teacher's `storage::contacts::ContactIdentity` (a static
//! identity record plus separately-cached mutable state) but flattened into
//! one `serde`-serializable row, since this crate's persistence layer is a
//! plain encrypted record store rather than the teacher's VSF sections.

use crate::crypto::primitives::{EncryptionPublicKey, SigningPublicKey};
use crate::types::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub fingerprint: Fingerprint,
    pub added_at: chrono::DateTime<chrono::Utc>,
    pub notes: Option<String>,
    pub registered_name: Option<String>,
    pub cached_signing_key: Option<Vec<u8>>,
    pub cached_encryption_key: Option<Vec<u8>>,
}

impl Contact {
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            added_at: chrono::Utc::now(),
            notes: None,
            registered_name: None,
            cached_signing_key: None,
            cached_encryption_key: None,
        }
    }

    /// Refresh the cached public keys from a fresh DHT lookup. The
    /// fingerprint itself is immutable per contact row (spec 3).
    pub fn refresh_keys(&mut self, signing: &SigningPublicKey, encryption: &EncryptionPublicKey) {
        self.cached_signing_key = Some(signing.as_bytes().to_vec());
        self.cached_encryption_key = Some(encryption.as_bytes().to_vec());
    }

    pub fn cached_signing_pubkey(&self) -> Option<SigningPublicKey> {
        self.cached_signing_key
            .clone()
            .map(SigningPublicKey::from_bytes)
    }

    pub fn cached_encryption_pubkey(&self) -> Option<EncryptionPublicKey> {
        self.cached_encryption_key
            .clone()
            .map(EncryptionPublicKey::from_bytes)
    }
}
