//! The per-identity contact list (`<fingerprint>/contacts.db`, spec 3, 6).
//!
//! Same flat `serde`/`bincode` persistence shape as [`super::messages`];
//! grounded in the teacher's `storage::contacts` single-writer discipline,
//! adapted from its VSF index file to a plain `Vec<Contact>` since the
//! fields involved (fingerprint, notes, cached keys) need no bespoke binary
//! layout here.

use super::error::{StorageError, StorageResult};
use crate::types::{Contact, Fingerprint};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct ContactStore {
    path: PathBuf,
    contacts: Mutex<Vec<Contact>>,
}

impl ContactStore {
    pub fn open(path: &Path) -> StorageResult<Self> {
        let contacts = if path.exists() {
            let bytes = std::fs::read(path)?;
            if bytes.is_empty() {
                Vec::new()
            } else {
                bincode::deserialize(&bytes).map_err(|e| StorageError::Parse(e.to_string()))?
            }
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            contacts: Mutex::new(contacts),
        })
    }

    fn persist(&self, guard: &[Contact]) -> StorageResult<()> {
        let serialized = bincode::serialize(guard).map_err(|e| StorageError::Parse(e.to_string()))?;
        std::fs::write(&self.path, serialized)?;
        Ok(())
    }

    /// Add a new contact row. Fails with `AlreadyExists`-mapped
    /// [`StorageError::Parse`]-free conflict if the fingerprint is already
    /// present (spec 3: "fingerprint unique within an identity's contact
    /// list").
    pub fn add(&self, contact: Contact) -> StorageResult<()> {
        let mut guard = self.contacts.lock().unwrap();
        if guard.iter().any(|c| c.fingerprint == contact.fingerprint) {
            return Err(StorageError::Parse(format!(
                "contact {} already exists",
                contact.fingerprint
            )));
        }
        guard.push(contact);
        self.persist(&guard)
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Contact> {
        self.contacts
            .lock()
            .unwrap()
            .iter()
            .find(|c| &c.fingerprint == fingerprint)
            .cloned()
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> StorageResult<()> {
        let mut guard = self.contacts.lock().unwrap();
        let before = guard.len();
        guard.retain(|c| &c.fingerprint != fingerprint);
        if guard.len() == before {
            return Err(StorageError::NotFound);
        }
        self.persist(&guard)
    }

    /// Replace an existing contact's cached keys (spec 3: "the public-key
    /// cache may be refreshed but the fingerprint is immutable").
    pub fn refresh_keys(
        &self,
        fingerprint: &Fingerprint,
        signing: &crate::crypto::primitives::SigningPublicKey,
        encryption: &crate::crypto::primitives::EncryptionPublicKey,
    ) -> StorageResult<()> {
        let mut guard = self.contacts.lock().unwrap();
        let contact = guard
            .iter_mut()
            .find(|c| &c.fingerprint == fingerprint)
            .ok_or(StorageError::NotFound)?;
        contact.refresh_keys(signing, encryption);
        self.persist(&guard)
    }

    pub fn list(&self) -> Vec<Contact> {
        self.contacts.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.contacts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::parse(&hex::encode([byte; 64])).unwrap()
    }

    #[test]
    fn add_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContactStore::open(&dir.path().join("contacts.db")).unwrap();
        let a = fp(1);
        store.add(Contact::new(a.clone())).unwrap();
        assert!(store.get(&a).is_some());
    }

    #[test]
    fn rejects_duplicate_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContactStore::open(&dir.path().join("contacts.db")).unwrap();
        let a = fp(2);
        store.add(Contact::new(a.clone())).unwrap();
        assert!(store.add(Contact::new(a)).is_err());
    }

    #[test]
    fn remove_then_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContactStore::open(&dir.path().join("contacts.db")).unwrap();
        let a = fp(3);
        store.add(Contact::new(a.clone())).unwrap();
        store.remove(&a).unwrap();
        assert!(store.get(&a).is_none());
        assert!(store.remove(&a).is_err());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.db");
        let a = fp(4);
        {
            let store = ContactStore::open(&path).unwrap();
            store.add(Contact::new(a.clone())).unwrap();
        }
        let reopened = ContactStore::open(&path).unwrap();
        assert!(reopened.get(&a).is_some());
    }
}
