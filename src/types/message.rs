//! A past-communication record (spec 3).
//!
//! Grounded in the teacher's `types::message::MessageStatus` enum shape and
//! `types::message::MessageId` (fixed-size hash newtype), adapted to this
//! crate's plaintext-message model (the teacher stores only ciphertext
//! sequence numbers; this spec requires the plaintext row once the sender's
//! signature has authenticated, per the invariant in spec 3).

use crate::types::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Chat,
    GroupInvitation,
    Receipt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    Direct(Fingerprint),
    Group(Uuid),
}

/// Monotonic local id, unique within a single identity's message store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: Fingerprint,
    pub recipient: Recipient,
    pub plaintext: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub status: MessageStatus,
    pub direction: Direction,
    pub kind: MessageKind,
    /// Hash of the envelope signature this message arrived in or was sent
    /// with; used for idempotent receive (spec 4.5, 8) and as the content
    /// reference for receipts (spec 9, Open Question on receipt payloads).
    pub signature_hash: [u8; 32],
}

impl Message {
    /// A receipt payload names the referenced message by
    /// `(sender_fp, send_timestamp, content_hash)` per spec 9's resolution
    /// of the receipt-schema open question.
    pub fn receipt_reference(&self) -> ReceiptReference {
        ReceiptReference {
            sender: self.sender.clone(),
            send_timestamp: self.timestamp,
            content_hash: crate::crypto::primitives::sha3_256(self.plaintext.as_bytes()),
        }
    }
}

/// Identifies the message a delivery/read receipt refers to, without
/// requiring a shared monotonic id across devices (spec 9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptReference {
    pub sender: Fingerprint,
    pub send_timestamp: chrono::DateTime<chrono::Utc>,
    pub content_hash: [u8; 32],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptKind {
    Delivered,
    Read,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub reference: ReceiptReference,
    pub kind: ReceiptKind,
}
