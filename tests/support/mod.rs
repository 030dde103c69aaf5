//! Shared helpers for the seed-scenario integration tests (spec 8). Every
//! scenario needs a handful of peers sharing one in-process DHT overlay,
//! since there is no real network between two loopback sockets in a test
//! process without NAT traversal infrastructure (see DESIGN.md's
//! `create_with_dht` entry).

use dna_messenger_core::crypto::bip39::MasterSeed;
use dna_messenger_core::crypto::primitives::{derive_fingerprint, EncryptionKeypair, SigningKeypair};
use dna_messenger_core::engine::Engine;
use dna_messenger_core::network::dht::{Dht, SharedDht};
use dna_messenger_core::types::Fingerprint;
use std::sync::Arc;

pub fn seed(byte: u8) -> MasterSeed {
    MasterSeed::from_bytes([byte; 32])
}

/// A throwaway fingerprint to anchor a fresh `Dht`'s routing table; it never
/// needs to correspond to a loaded identity.
pub fn anchor_fingerprint(byte: u8) -> Fingerprint {
    let signing = SigningKeypair::generate_from_seed(&[byte; 32]).unwrap();
    let encryption = EncryptionKeypair::generate_from_seed(&[byte; 32]).unwrap();
    Fingerprint::parse(&derive_fingerprint(signing.public_key(), encryption.public_key())).unwrap()
}

pub fn shared_dht() -> SharedDht {
    Arc::new(Dht::new(anchor_fingerprint(0)))
}

/// Bring up a fresh engine sharing `dht`, with its own temp data directory,
/// and load a brand-new identity `name` deterministically from
/// `(signing_seed, encryption_seed)`. Returns the engine plus its
/// fingerprint; the `TempDir` guard must be kept alive by the caller for as
/// long as the engine is in use.
pub async fn spin_up(
    name: &str,
    signing_seed: u8,
    encryption_seed: u8,
    dht: SharedDht,
) -> (tempfile::TempDir, Engine, Fingerprint) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::create_with_dht(dir.path(), dht).unwrap();
    let fingerprint = engine
        .create_identity(name, &seed(signing_seed), &seed(encryption_seed))
        .await
        .unwrap();
    (dir, engine, fingerprint)
}
