//! File system layout and identity-directory name validation (spec 6).
//!
//! ```text
//! <data_dir>/<fingerprint>/keys/signing.dsa    exclusive 0600
//! <data_dir>/<fingerprint>/keys/encryption.kem exclusive 0600
//! <data_dir>/<fingerprint>/messages.db
//! <data_dir>/<fingerprint>/contacts.db
//! <data_dir>/<fingerprint>/cache/
//! <data_dir>/config
//! ```
//!
//! Grounded in the teacher's `dirs::config_dir()?.join("photon")` base-dir
//! convention (`storage::contacts::photon_config_dir`).

use super::error::{StorageError, StorageResult};
use std::path::{Path, PathBuf};

const MIN_NAME_LEN: usize = 1;
const MAX_NAME_LEN: usize = 128;

/// Identity directory names must be `[A-Za-z0-9_-]+`, 1-128 bytes. Path
/// separators, `:`, `.`, and NUL are explicitly rejected, along with any
/// other character outside the whitelist (spec 6, 8).
pub fn validate_identity_name(name: &str) -> StorageResult<()> {
    let len = name.len();
    if len < MIN_NAME_LEN || len > MAX_NAME_LEN {
        return Err(StorageError::Permission(format!(
            "identity name length {len} outside [1,128]"
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(StorageError::Permission(
            "identity name contains a character outside [A-Za-z0-9_-]".into(),
        ));
    }
    Ok(())
}

pub fn default_data_dir() -> StorageResult<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no home directory",
        ))
    })?;
    Ok(home.join(".dna"))
}

pub struct IdentityPaths {
    root: PathBuf,
}

impl IdentityPaths {
    pub fn new(data_dir: &Path, identity_name: &str) -> StorageResult<Self> {
        validate_identity_name(identity_name)?;
        Ok(Self {
            root: data_dir.join(identity_name),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    pub fn signing_key_path(&self) -> PathBuf {
        self.keys_dir().join("signing.dsa")
    }

    pub fn encryption_key_path(&self) -> PathBuf {
        self.keys_dir().join("encryption.kem")
    }

    pub fn messages_db_path(&self) -> PathBuf {
        self.root.join("messages.db")
    }

    pub fn contacts_db_path(&self) -> PathBuf {
        self.root.join("contacts.db")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn ensure_directories(&self) -> StorageResult<()> {
        std::fs::create_dir_all(self.keys_dir())?;
        std::fs::create_dir_all(self.cache_dir())?;
        Ok(())
    }
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config")
}
