//! What actually rides inside an envelope's or group frame's plaintext:
//! a chat message, a group invitation, or a delivery/read receipt (spec 3's
//! `MessageKind`). The envelope and group-frame wire formats only know
//! about opaque plaintext bytes; this small wrapper is what lets the
//! receive pipeline tell the three apart without a second round of
//! transport-level framing.

use crate::types::{Receipt, ReceiptKind, ReceiptReference};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInvitationPayload {
    pub group_id: Uuid,
    pub group_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlaintextPayload {
    Chat(String),
    GroupInvitation(GroupInvitationPayload),
    Receipt(Receipt),
}

impl PlaintextPayload {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("PlaintextPayload always serializes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    pub fn receipt(reference: ReceiptReference, kind: ReceiptKind) -> Self {
        Self::Receipt(Receipt { reference, kind })
    }
}
