//! The per-identity message store (`<fingerprint>/messages.db`, spec 6).
//!
//! Grounded in the teacher's single-writer-multi-reader discipline
//! (`storage::contacts` doc comment: "only the engine mutates them") but
//! using `serde`/`bincode` flat-file persistence rather than the teacher's
//! VSF format, which is not available outside its own workspace (see
//! DESIGN.md). A write-then-verify check after every append marks the
//! store `Degraded` on mismatch (spec 7): once degraded, further writes are
//! refused until the process restarts.

use super::error::{StorageError, StorageResult};
use crate::crypto::primitives::sha3_256;
use crate::types::{Direction, Fingerprint, Message, MessageId, MessageStatus, Recipient};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

struct Inner {
    messages: Vec<Message>,
    seen_signatures: HashSet<[u8; 32]>,
}

pub struct MessageStore {
    path: PathBuf,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    degraded: AtomicBool,
}

impl MessageStore {
    pub fn open(path: &Path) -> StorageResult<Self> {
        let messages = if path.exists() {
            let bytes = std::fs::read(path)?;
            if bytes.is_empty() {
                Vec::new()
            } else {
                bincode::deserialize(&bytes).map_err(|e| StorageError::Parse(e.to_string()))?
            }
        } else {
            Vec::new()
        };
        let next_id = messages.iter().map(|m| m.id.0).max().map(|m| m + 1).unwrap_or(0);
        let seen_signatures = messages.iter().map(|m| m.signature_hash).collect();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                messages,
                seen_signatures,
            }),
            next_id: AtomicU64::new(next_id),
            degraded: AtomicBool::new(false),
        })
    }

    fn check_not_degraded(&self) -> StorageResult<()> {
        if self.degraded.load(Ordering::SeqCst) {
            return Err(StorageError::Degraded);
        }
        Ok(())
    }

    /// Allocate the next monotonic local id, unique within this store.
    pub fn next_id(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Has a message with this envelope signature hash already been
    /// ingested? Used by the receive pipeline and inbox poller for
    /// idempotent processing (spec 4.5, 8).
    pub fn has_signature(&self, signature_hash: &[u8; 32]) -> bool {
        self.inner.lock().unwrap().seen_signatures.contains(signature_hash)
    }

    /// Insert a new message row, persist, and verify the on-disk bytes
    /// actually reflect what was written. A write-then-verify mismatch
    /// marks the store degraded and refuses all further writes (spec 7).
    pub fn insert(&self, message: Message) -> StorageResult<()> {
        self.check_not_degraded()?;
        if self.has_signature(&message.signature_hash) {
            return Ok(());
        }

        let mut guard = self.inner.lock().unwrap();
        guard.seen_signatures.insert(message.signature_hash);
        guard.messages.push(message);
        let serialized = bincode::serialize(&guard.messages).map_err(|e| StorageError::Parse(e.to_string()))?;
        drop(guard);

        self.write_then_verify(&serialized)
    }

    pub fn update_status(&self, id: MessageId, status: MessageStatus) -> StorageResult<()> {
        self.check_not_degraded()?;
        let mut guard = self.inner.lock().unwrap();
        let found = guard
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StorageError::NotFound)?;
        found.status = status;
        let serialized = bincode::serialize(&guard.messages).map_err(|e| StorageError::Parse(e.to_string()))?;
        drop(guard);
        self.write_then_verify(&serialized)
    }

    fn write_then_verify(&self, serialized: &[u8]) -> StorageResult<()> {
        std::fs::write(&self.path, serialized)?;
        let reread = std::fs::read(&self.path)?;
        if sha3_256(&reread) != sha3_256(serialized) {
            self.degraded.store(true, Ordering::SeqCst);
            return Err(StorageError::Degraded);
        }
        Ok(())
    }

    /// All messages in a 1:1 conversation with `contact`, in store order.
    pub fn conversation(&self, contact: &Fingerprint) -> Vec<Message> {
        let guard = self.inner.lock().unwrap();
        guard
            .messages
            .iter()
            .filter(|m| match (&m.direction, &m.recipient) {
                (Direction::Incoming, _) => &m.sender == contact,
                (Direction::Outgoing, Recipient::Direct(r)) => r == contact,
                (Direction::Outgoing, Recipient::Group(_)) => false,
            })
            .cloned()
            .collect()
    }

    pub fn group_conversation(&self, group: &uuid::Uuid) -> Vec<Message> {
        let guard = self.inner.lock().unwrap();
        guard
            .messages
            .iter()
            .filter(|m| matches!(&m.recipient, Recipient::Group(g) if g == group))
            .cloned()
            .collect()
    }

    pub fn find_by_id(&self, id: MessageId) -> Option<Message> {
        self.inner.lock().unwrap().messages.iter().find(|m| m.id == id).cloned()
    }

    /// Find an outgoing message matching a receipt's `(sender, send_timestamp,
    /// content_hash)` reference (spec 9's receipt resolution).
    pub fn find_by_receipt_reference(
        &self,
        sender: &Fingerprint,
        send_timestamp: chrono::DateTime<chrono::Utc>,
        content_hash: &[u8; 32],
    ) -> Option<Message> {
        self.inner.lock().unwrap().messages.iter().find(|m| {
            &m.sender == sender
                && m.timestamp == send_timestamp
                && sha3_256(m.plaintext.as_bytes()) == *content_hash
        }).cloned()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, MessageKind, MessageStatus};

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::parse(&hex::encode([byte; 64])).unwrap()
    }

    fn sample_message(id: u64, sender: Fingerprint, recipient: Recipient, sig: u8) -> Message {
        Message {
            id: MessageId(id),
            sender,
            recipient,
            plaintext: "hello".into(),
            timestamp: chrono::Utc::now(),
            status: MessageStatus::Pending,
            direction: Direction::Incoming,
            kind: MessageKind::Chat,
            signature_hash: [sig; 32],
        }
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.db");
        let store = MessageStore::open(&path).unwrap();
        let a = fp(1);
        store
            .insert(sample_message(0, a.clone(), Recipient::Direct(a.clone()), 1))
            .unwrap();

        let reopened = MessageStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn duplicate_signature_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.db");
        let store = MessageStore::open(&path).unwrap();
        let a = fp(2);
        let msg = sample_message(0, a.clone(), Recipient::Direct(a.clone()), 7);
        store.insert(msg.clone()).unwrap();
        store.insert(msg).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn conversation_filters_by_contact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.db");
        let store = MessageStore::open(&path).unwrap();
        let a = fp(3);
        let b = fp(4);
        store
            .insert(sample_message(0, a.clone(), Recipient::Direct(a.clone()), 1))
            .unwrap();
        store
            .insert(sample_message(1, b.clone(), Recipient::Direct(b.clone()), 2))
            .unwrap();
        assert_eq!(store.conversation(&a).len(), 1);
        assert_eq!(store.conversation(&b).len(), 1);
    }

    #[test]
    fn ids_are_monotonic_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.db");
        let store = MessageStore::open(&path).unwrap();
        let a = fp(5);
        let id0 = store.next_id();
        store
            .insert(sample_message(id0.0, a.clone(), Recipient::Direct(a.clone()), 9))
            .unwrap();
        drop(store);

        let reopened = MessageStore::open(&path).unwrap();
        let id1 = reopened.next_id();
        assert!(id1.0 > id0.0);
    }
}
