//! Identity lifecycle: creating a new on-disk identity, and loading an
//! existing one's secrets and per-identity stores into memory (spec 3, 4.5,
//! 6). Destroying an identity's in-memory state zeroes its secret
//! keypairs; see [`LoadedIdentity::zeroize_on_drop`] note below.

use crate::crypto::bip39::MasterSeed;
use crate::crypto::primitives::CryptoError;
use crate::error::{EngineError, EngineResult};
use crate::storage::{ContactStore, GroupStore, IdentityPaths, MessageStore};
use crate::types::Identity;

/// An identity fully loaded into memory: its secret keypairs plus its
/// three per-identity stores (messages, contacts, groups). Holding this is
/// what distinguishes the `IdentityLoaded`/`Running` engine states from
/// `Bootstrapped` (spec 4.5).
pub struct LoadedIdentity {
    pub identity: Identity,
    pub paths: IdentityPaths,
    pub messages: MessageStore,
    pub contacts: ContactStore,
    pub groups: GroupStore,
}

impl LoadedIdentity {
    /// Create a brand-new identity directory under `data_dir/<name>`:
    /// derive keys from the two 32-byte seeds, write them with exclusive
    /// `0600` permissions, and open empty stores (spec 3: "Created by
    /// generating two 32-byte seeds").
    pub fn create(
        data_dir: &std::path::Path,
        name: &str,
        signing_seed: &MasterSeed,
        encryption_seed: &MasterSeed,
    ) -> EngineResult<Self> {
        let paths = IdentityPaths::new(data_dir, name).map_err(EngineError::from)?;
        paths.ensure_directories().map_err(EngineError::from)?;

        let identity = Identity::from_seeds(signing_seed.as_bytes(), encryption_seed.as_bytes())
            .map_err(EngineError::from)?;

        crate::storage::keystore::save_signing_seed(&paths.signing_key_path(), signing_seed)
            .map_err(EngineError::from)?;
        crate::storage::keystore::save_encryption_seed(&paths.encryption_key_path(), encryption_seed)
            .map_err(EngineError::from)?;

        let messages = MessageStore::open(&paths.messages_db_path()).map_err(EngineError::from)?;
        let contacts = ContactStore::open(&paths.contacts_db_path()).map_err(EngineError::from)?;
        let groups = GroupStore::open(&paths.cache_dir().join("groups.db")).map_err(EngineError::from)?;

        Ok(Self {
            identity,
            paths,
            messages,
            contacts,
            groups,
        })
    }

    /// Load an already-created identity's secrets and stores from disk
    /// (spec 4.5: `load_identity(fp)` -> keys loaded into memory, per-
    /// identity DB opened).
    pub fn load(data_dir: &std::path::Path, name: &str) -> EngineResult<Self> {
        let paths = IdentityPaths::new(data_dir, name).map_err(EngineError::from)?;

        let signing_seed = crate::storage::keystore::load_seed(&paths.signing_key_path())
            .map_err(EngineError::from)?;
        let encryption_seed = crate::storage::keystore::load_seed(&paths.encryption_key_path())
            .map_err(EngineError::from)?;

        let identity = Identity::from_seeds(signing_seed.as_bytes(), encryption_seed.as_bytes())
            .map_err(EngineError::from)?;

        let messages = MessageStore::open(&paths.messages_db_path()).map_err(EngineError::from)?;
        let contacts = ContactStore::open(&paths.contacts_db_path()).map_err(EngineError::from)?;
        let groups = GroupStore::open(&paths.cache_dir().join("groups.db")).map_err(EngineError::from)?;

        Ok(Self {
            identity,
            paths,
            messages,
            contacts,
            groups,
        })
    }

    /// List every identity directory name under `data_dir` (spec 6's
    /// `list_identities`). Directories that fail the identity-name
    /// whitelist are silently skipped rather than surfaced as an error —
    /// they cannot have been created by this crate.
    pub fn list(data_dir: &std::path::Path) -> EngineResult<Vec<String>> {
        if !data_dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(data_dir).map_err(|e| EngineError::Storage(e.to_string()))? {
            let entry = entry.map_err(|e| EngineError::Storage(e.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if crate::storage::validate_identity_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Generate two independent 32-byte seeds directly from secure random,
/// without a BIP39 mnemonic (spec 3: "generating two 32-byte seeds
/// (independently...)").
pub fn random_identity_seeds() -> Result<(MasterSeed, MasterSeed), CryptoError> {
    let signing = crate::crypto::primitives::random_array::<32>()?;
    let encryption = crate::crypto::primitives::random_array::<32>()?;
    Ok((MasterSeed::from_bytes(signing), MasterSeed::from_bytes(encryption)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_load_round_trips_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let signing = MasterSeed::from_bytes([1u8; 32]);
        let encryption = MasterSeed::from_bytes([2u8; 32]);
        let created = LoadedIdentity::create(dir.path(), "alice", &signing, &encryption).unwrap();
        let fp = created.identity.fingerprint.clone();
        drop(created);

        let loaded = LoadedIdentity::load(dir.path(), "alice").unwrap();
        assert_eq!(loaded.identity.fingerprint, fp);
    }

    #[test]
    fn rejects_malicious_identity_name() {
        let dir = tempfile::tempdir().unwrap();
        let signing = MasterSeed::from_bytes([3u8; 32]);
        let encryption = MasterSeed::from_bytes([4u8; 32]);
        assert!(LoadedIdentity::create(dir.path(), "../escape", &signing, &encryption).is_err());
    }

    #[test]
    fn list_returns_created_identities() {
        let dir = tempfile::tempdir().unwrap();
        let signing = MasterSeed::from_bytes([5u8; 32]);
        let encryption = MasterSeed::from_bytes([6u8; 32]);
        LoadedIdentity::create(dir.path(), "bob", &signing, &encryption).unwrap();
        let names = LoadedIdentity::list(dir.path()).unwrap();
        assert_eq!(names, vec!["bob".to_string()]);
    }
}
