//! Cryptographic core: post-quantum primitives, the message envelope, and
//! the BIP39 mnemonic/seed pipeline used to bootstrap an identity.
//!
//! Every routine here operates on caller-provided, size-checked buffers and
//! zeroes sensitive material before it is dropped. Nothing in this module
//! ever returns success with undefined output: failures are always a typed
//! `CryptoError`.

pub mod bip39;
pub mod envelope;
pub mod primitives;

pub use bip39::MasterSeed;
pub use envelope::{Envelope, EnvelopeError};
pub use primitives::{
    random_bytes, CryptoError, EncryptionKeypair, EncryptionPublicKey, SharedSecret,
    SigningKeypair, SigningPublicKey, DEK_LEN, FINGERPRINT_HEX_LEN, MATCH_TAG_LEN,
};
