//! Group messaging wire format and GSK (Group Symmetric Key) capsule
//! construction (spec 3, 4.3, 4.5).
//!
//! Unlike the 1:1 envelope (`crypto::envelope`), a group message is
//! encrypted once under the shared GSK rather than per-recipient, so there
//! is no recipient-hiding match tag to compute — every current member
//! already knows who else is in the group. The frame instead carries the
//! sender's fingerprint directly in its signed preamble, the GSK id so the
//! reader knows which generation of the key to use, and a detached
//! ML-DSA-87 signature over the whole assembled frame, mirroring the
//! envelope's own "assemble then sign" shape.

use crate::crypto::primitives::{
    self, secure_rng, CryptoError, EncryptionKeypair, EncryptionPublicKey, SharedSecret,
    SigningKeypair, SigningPublicKey, DEK_LEN,
};
use crate::error::{EngineError, EngineResult};
use crate::types::Fingerprint;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GroupFramePreamble {
    group_id: Uuid,
    gsk_id: Uuid,
    sender: Fingerprint,
    nonce: [u8; NONCE_LEN],
}

/// An encrypted group chat message, addressed to a specific GSK generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessageFrame {
    preamble_bytes: Vec<u8>,
    ciphertext_and_tag: Vec<u8>,
    signature: Vec<u8>,
}

impl GroupMessageFrame {
    pub fn encrypt(
        group_id: Uuid,
        gsk_id: Uuid,
        gsk: &[u8; DEK_LEN],
        sender: Fingerprint,
        sender_signing: &SigningKeypair,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&primitives::random_bytes(NONCE_LEN)?);

        let preamble = GroupFramePreamble {
            group_id,
            gsk_id,
            sender,
            nonce,
        };
        let preamble_bytes = bincode::serialize(&preamble).expect("preamble always serializes");

        let ciphertext_and_tag = primitives::aead_encrypt(gsk, &nonce, plaintext, &preamble_bytes)?;

        let mut signed = Vec::with_capacity(preamble_bytes.len() + ciphertext_and_tag.len());
        signed.extend_from_slice(&preamble_bytes);
        signed.extend_from_slice(&ciphertext_and_tag);
        let signature = sender_signing.sign(&signed);

        let frame = Self {
            preamble_bytes,
            ciphertext_and_tag,
            signature,
        };
        Ok(bincode::serialize(&frame).expect("frame always serializes"))
    }

    pub fn parse(wire: &[u8]) -> Result<Self, EngineError> {
        bincode::deserialize(wire).map_err(|e| EngineError::Crypto(format!("malformed group frame: {e}")))
    }

    pub fn preamble(&self) -> Result<(Uuid, Uuid, Fingerprint), EngineError> {
        let preamble: GroupFramePreamble = bincode::deserialize(&self.preamble_bytes)
            .map_err(|e| EngineError::Crypto(format!("malformed group frame preamble: {e}")))?;
        Ok((preamble.group_id, preamble.gsk_id, preamble.sender))
    }

    /// Verify the frame's signature and, if it validates, decrypt under
    /// `gsk`. A member who only holds an older GSK will fail decryption
    /// here with `Crypto` (spec 8, scenario 5: "a subsequent group-message
    /// ... returns Crypto for C, who still only has K1").
    pub fn open(&self, gsk: &[u8; DEK_LEN], sender_key: &SigningPublicKey) -> EngineResult<Vec<u8>> {
        let mut signed = Vec::with_capacity(self.preamble_bytes.len() + self.ciphertext_and_tag.len());
        signed.extend_from_slice(&self.preamble_bytes);
        signed.extend_from_slice(&self.ciphertext_and_tag);
        sender_key
            .verify(&signed, &self.signature)
            .map_err(|_| EngineError::Auth)?;

        let preamble: GroupFramePreamble = bincode::deserialize(&self.preamble_bytes)
            .map_err(|e| EngineError::Crypto(format!("malformed group frame preamble: {e}")))?;
        primitives::aead_decrypt(gsk, &preamble.nonce, &self.ciphertext_and_tag, &self.preamble_bytes)
            .map_err(EngineError::from)
    }
}

/// Build one member's GSK capsule: KEM-encapsulate against their
/// encryption pubkey and AES-KW-wrap the GSK under the resulting shared
/// secret (spec 4.5: "KEM-encapsulated under each member's encryption
/// pubkey"). Returns `(kem_ciphertext, wrapped_key)` ready to embed in a
/// `GroupKeyCapsuleRecord`.
pub fn build_capsule(
    member_encryption_key: &EncryptionPublicKey,
    gsk: &[u8; DEK_LEN],
) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let mut rng = secure_rng()?;
    let (kem_ciphertext, shared_secret) = EncryptionKeypair::encapsulate(member_encryption_key, &mut rng)?;
    let wrapped_key = primitives::kw_wrap_dek(&shared_secret, gsk)?;
    Ok((kem_ciphertext, wrapped_key))
}

/// Consume a capsule addressed to this identity's encryption keypair,
/// recovering the GSK it carries.
pub fn open_capsule(
    own_encryption: &EncryptionKeypair,
    kem_ciphertext: &[u8],
    wrapped_key: &[u8],
) -> Result<[u8; DEK_LEN], CryptoError> {
    let shared_secret: SharedSecret = own_encryption.decapsulate(kem_ciphertext)?;
    primitives::kw_unwrap_dek(&shared_secret, wrapped_key)
}

/// Generate a fresh 32-byte GSK, fail-closed on entropy exhaustion (spec
/// 4.5: rotation "generates a new 32-byte GSK").
pub fn generate_gsk() -> Result<[u8; DEK_LEN], CryptoError> {
    let mut gsk = [0u8; DEK_LEN];
    gsk.copy_from_slice(&primitives::random_bytes(DEK_LEN)?);
    Ok(gsk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::primitives::{EncryptionKeypair, SigningKeypair};

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::parse(&hex::encode([byte; 64])).unwrap()
    }

    #[test]
    fn group_message_round_trips_under_correct_gsk() {
        let signer = SigningKeypair::generate_from_seed(&[1u8; 32]).unwrap();
        let group_id = Uuid::nil();
        let gsk_id = Uuid::nil();
        let gsk = [9u8; DEK_LEN];
        let sender = fp(1);

        let wire =
            GroupMessageFrame::encrypt(group_id, gsk_id, &gsk, sender.clone(), &signer, b"hello group")
                .unwrap();
        let frame = GroupMessageFrame::parse(&wire).unwrap();
        let (g, k, s) = frame.preamble().unwrap();
        assert_eq!(g, group_id);
        assert_eq!(k, gsk_id);
        assert_eq!(s, sender);

        let plaintext = frame.open(&gsk, signer.public_key()).unwrap();
        assert_eq!(plaintext, b"hello group");
    }

    #[test]
    fn stale_gsk_fails_to_decrypt() {
        let signer = SigningKeypair::generate_from_seed(&[2u8; 32]).unwrap();
        let gsk_new = [1u8; DEK_LEN];
        let gsk_old = [2u8; DEK_LEN];
        let wire = GroupMessageFrame::encrypt(
            Uuid::nil(),
            Uuid::nil(),
            &gsk_new,
            fp(2),
            &signer,
            b"rotated",
        )
        .unwrap();
        let frame = GroupMessageFrame::parse(&wire).unwrap();
        assert!(frame.open(&gsk_old, signer.public_key()).is_err());
    }

    #[test]
    fn capsule_round_trips_gsk() {
        let member = EncryptionKeypair::generate_from_seed(&[3u8; 32]).unwrap();
        let gsk = generate_gsk().unwrap();
        let (ct, wrapped) = build_capsule(member.public_key(), &gsk).unwrap();
        let recovered = open_capsule(&member, &ct, &wrapped).unwrap();
        assert_eq!(recovered, gsk);
    }
}
