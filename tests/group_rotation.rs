//! Seed scenario for group key rotation (spec 8): a member removed from a
//! group is left holding the superseded GSK. Their copy of the frame's
//! signature still verifies (the signing key never changed), but the AEAD
//! body was sealed under the new GSK, so decryption fails with `Crypto`
//! while a still-current member opens the same frame fine.

mod support;

use dna_messenger_core::engine::groups::{self, GroupMessageFrame};
use dna_messenger_core::engine::identity::LoadedIdentity;
use dna_messenger_core::network::dht::records::GroupKeyCapsuleRecord;
use dna_messenger_core::network::dht::{keys, DhtValue, PayloadTag, SignedPayload};
use dna_messenger_core::EngineError;
use uuid::Uuid;

fn fresh_identity(dir: &tempfile::TempDir, name: &str, sign: u8, enc: u8) -> LoadedIdentity {
    LoadedIdentity::create(dir.path(), name, &support::seed(sign), &support::seed(enc)).unwrap()
}

/// Publish `member`'s capsule for `gsk` under `gsk_id`, exactly as
/// `Engine::publish_gsk_capsules` does, then fetch and open it back as that
/// member to confirm it propagates over the DHT rather than just in memory.
async fn publish_and_recover_capsule(
    dht: &dna_messenger_core::network::dht::SharedDht,
    signer: &LoadedIdentity,
    member: &LoadedIdentity,
    group_id: Uuid,
    gsk_id: Uuid,
    gsk: &[u8; 32],
) -> [u8; 32] {
    let (kem_ciphertext, wrapped_key) = groups::build_capsule(member.identity.encryption.public_key(), gsk).unwrap();
    let record = GroupKeyCapsuleRecord {
        group_id,
        member: member.identity.fingerprint.clone(),
        gsk_id,
        kem_ciphertext,
        wrapped_key,
    };
    let body = bincode::serialize(&record).unwrap();
    let payload = SignedPayload::sign(PayloadTag::GroupKeyCapsule, body, &signer.identity.signing);
    let value = DhtValue {
        payload,
        publisher: signer.identity.fingerprint.clone(),
        publish_timestamp: chrono::Utc::now(),
        ttl: std::time::Duration::from_secs(7 * 24 * 60 * 60),
    };
    dht.put(keys::group_key_capsule_record(&group_id, &member.identity.fingerprint), value)
        .await
        .unwrap();

    let fetched = dht
        .get(&keys::group_key_capsule_record(&group_id, &member.identity.fingerprint))
        .await
        .unwrap();
    let record: GroupKeyCapsuleRecord = bincode::deserialize(&fetched[0].payload.body).unwrap();
    groups::open_capsule(&member.identity.encryption, &record.kem_ciphertext, &record.wrapped_key).unwrap()
}

#[tokio::test]
async fn removed_member_cannot_decrypt_messages_sent_under_the_rotated_gsk() {
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();
    let carol_dir = tempfile::tempdir().unwrap();
    let alice = fresh_identity(&alice_dir, "alice", 30, 31);
    let bob = fresh_identity(&bob_dir, "bob", 32, 33);
    let carol = fresh_identity(&carol_dir, "carol", 34, 35);

    let dht = support::shared_dht();
    let group_id = Uuid::from_u128(1);

    // Generation 1: alice, bob, and carol are all members.
    let gsk1_id = Uuid::from_u128(101);
    let gsk1 = groups::generate_gsk().unwrap();
    let bob_gsk1 = publish_and_recover_capsule(&dht, &alice, &bob, group_id, gsk1_id, &gsk1).await;
    let carol_gsk1 = publish_and_recover_capsule(&dht, &alice, &carol, group_id, gsk1_id, &gsk1).await;
    assert_eq!(bob_gsk1, gsk1);
    assert_eq!(carol_gsk1, gsk1);

    let wire1 = GroupMessageFrame::encrypt(
        group_id,
        gsk1_id,
        &gsk1,
        alice.identity.fingerprint.clone(),
        &alice.identity.signing,
        b"welcome to the group",
    )
    .unwrap();
    let frame1 = GroupMessageFrame::parse(&wire1).unwrap();
    assert_eq!(
        frame1.open(&gsk1, alice.identity.signing.public_key()).unwrap(),
        b"welcome to the group"
    );

    // Alice removes bob: mint a fresh GSK, republish a capsule only for
    // carol (spec 4.5: the removed member gets no new capsule).
    let gsk2_id = Uuid::from_u128(102);
    let gsk2 = groups::generate_gsk().unwrap();
    let carol_gsk2 = publish_and_recover_capsule(&dht, &alice, &carol, group_id, gsk2_id, &gsk2).await;
    assert_eq!(carol_gsk2, gsk2);
    assert!(
        dht.get(&keys::group_key_capsule_record(&group_id, &bob.identity.fingerprint))
            .await
            .map(|values| values.iter().all(|v| {
                bincode::deserialize::<GroupKeyCapsuleRecord>(&v.payload.body)
                    .map(|r| r.gsk_id != gsk2_id)
                    .unwrap_or(true)
            }))
            .unwrap_or(true),
        "bob must not receive a capsule for the post-removal GSK"
    );

    let wire2 = GroupMessageFrame::encrypt(
        group_id,
        gsk2_id,
        &gsk2,
        alice.identity.fingerprint.clone(),
        &alice.identity.signing,
        b"bob should not be able to read this",
    )
    .unwrap();
    let frame2 = GroupMessageFrame::parse(&wire2).unwrap();

    // Carol, still current, decrypts fine.
    assert_eq!(
        frame2.open(&carol_gsk2, alice.identity.signing.public_key()).unwrap(),
        b"bob should not be able to read this"
    );

    // Bob, stuck on the superseded GSK, fails with Crypto even though the
    // signature itself is still valid (alice's signing key never rotated).
    let err = frame2.open(&bob_gsk1, alice.identity.signing.public_key()).unwrap_err();
    assert!(matches!(err, EngineError::Crypto(_)));
}
