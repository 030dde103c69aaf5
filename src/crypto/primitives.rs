//! Deterministic, side-channel-aware wrappers around the post-quantum and
//! classical primitives the rest of the crate builds on: ML-KEM-1024,
//! ML-DSA-87, AES-256-GCM, SHA3-256/512, and HKDF.
//!
//! Grounded in `abokenan444-shield-messenger`'s `crypto/pqc.rs` (narrow wrapper
//! struct around the RustCrypto PQC crates, `Zeroize` on drop) and
//! `polylabs-dev-polykit`'s `identity.rs` (HKDF-expand a master seed into two
//! independent seeds, one per algorithm).

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key as AesKey, Nonce};
use aes_kw::Kek;
use hkdf::Hkdf;
use ml_dsa::{EncodedVerifyingKey, KeyGen, MlDsa87, Signature as MlDsaSignature};
use ml_kem::kem::{Decapsulate, Encapsulate};
use ml_kem::{Ciphertext as KemCiphertext, EncodedSizeUser, KemCore, MlKem1024};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha3::{Digest, Sha3_256, Sha3_512};
use signature::{Signer, Verifier};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 32-byte symmetric Data Encryption Key.
pub const DEK_LEN: usize = 32;
/// 16-byte HKDF-derived recipient match tag (see `crypto::envelope`).
pub const MATCH_TAG_LEN: usize = 16;
/// A fingerprint is `hex::encode(SHA3-512(..))`, i.e. 128 hex characters.
pub const FINGERPRINT_HEX_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("entropy source unavailable")]
    EntropyUnavailable,
    #[error("invalid key size: expected {expected}, got {got}")]
    InvalidKeySize { expected: usize, got: usize },
    #[error("ML-KEM key generation failed")]
    KemKeygenFailed,
    #[error("ML-KEM encapsulation failed")]
    KemEncapsulateFailed,
    #[error("ML-KEM decapsulation failed")]
    KemDecapsulateFailed,
    #[error("ML-DSA key generation failed")]
    SigKeygenFailed,
    #[error("ML-DSA signature verification failed")]
    SigVerifyFailed,
    #[error("AEAD encryption failed")]
    AeadEncryptFailed,
    #[error("AEAD decryption/authentication failed")]
    AeadDecryptFailed,
    #[error("key wrap failed")]
    KeyWrapFailed,
    #[error("key unwrap failed")]
    KeyUnwrapFailed,
    #[error("HKDF expand failed: requested length out of range")]
    HkdfExpandFailed,
}

/// Draw `len` bytes from the OS entropy source. Fails closed: if the pool
/// cannot be queried (`getrandom` returns an error) this returns
/// `EntropyUnavailable` rather than ever falling back to a userspace PRNG.
/// No value that affects confidentiality, integrity, or uniqueness (DEKs,
/// nonces, UUIDs, ephemeral keys) may be generated any other way.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf).map_err(|_| CryptoError::EntropyUnavailable)?;
    Ok(buf)
}

/// Secure-random fixed-size array, fail-closed per [`random_bytes`].
pub fn random_array<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf).map_err(|_| CryptoError::EntropyUnavailable)?;
    Ok(buf)
}

pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha3_512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha3_512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// HKDF-SHA3-256 extract-then-expand into exactly `N` bytes.
/// Used throughout the crate for domain-separated key derivation: recipient
/// match tags (`crypto::envelope`), per-app seed splitting (below), and DHT
/// record keys (`network::dht::keys`) each pick their own `info` string.
pub fn hkdf_expand<const N: usize>(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
) -> Result<[u8; N], CryptoError> {
    let hk = Hkdf::<Sha3_256>::new(Some(salt), ikm);
    let mut out = [0u8; N];
    hk.expand(info, &mut out)
        .map_err(|_| CryptoError::HkdfExpandFailed)?;
    Ok(out)
}

/// A 32-byte KEM shared secret, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(pub [u8; 32]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// ML-KEM-1024 encryption public key.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EncryptionPublicKey(Vec<u8>);

impl EncryptionPublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// ML-KEM-1024 keypair, deterministically generated from a 32-byte seed
/// (spec: "Deterministic keypair generation from 32-byte seeds"). The seed
/// is expanded via HKDF into FIPS 203's two keygen seeds (`d`, `z`) so a
/// single caller-supplied seed fully determines the keypair.
pub struct EncryptionKeypair {
    decapsulation_key: <MlKem1024 as KemCore>::DecapsulationKey,
    public: EncryptionPublicKey,
}

impl EncryptionKeypair {
    pub fn generate_from_seed(seed: &[u8; 32]) -> Result<Self, CryptoError> {
        let expanded: [u8; 64] = hkdf_expand(seed, b"", b"dna:kem:keygen-seed")?;
        let d: [u8; 32] = expanded[..32].try_into().unwrap();
        let z: [u8; 32] = expanded[32..].try_into().unwrap();
        let (decapsulation_key, encapsulation_key) =
            MlKem1024::generate_deterministic(&d.into(), &z.into());
        let public = EncryptionPublicKey(encapsulation_key.as_bytes().to_vec());
        Ok(Self {
            decapsulation_key,
            public,
        })
    }

    pub fn public_key(&self) -> &EncryptionPublicKey {
        &self.public
    }

    /// Encapsulate against `their_public`, returning the wire ciphertext and
    /// the derived shared secret.
    pub fn encapsulate(
        their_public: &EncryptionPublicKey,
        rng: &mut impl rand_core_compat::CryptoRngCore,
    ) -> Result<(Vec<u8>, SharedSecret), CryptoError> {
        let encoded = ml_kem::Encoded::<<MlKem1024 as KemCore>::EncapsulationKey>::try_from(
            their_public.as_bytes(),
        )
        .map_err(|_| CryptoError::InvalidKeySize {
            expected: EncryptionKeypair::PUBLIC_KEY_LEN,
            got: their_public.as_bytes().len(),
        })?;
        let ek = <MlKem1024 as KemCore>::EncapsulationKey::from_bytes(&encoded);
        let (ct, ss) = ek
            .encapsulate(rng)
            .map_err(|_| CryptoError::KemEncapsulateFailed)?;
        let mut shared = [0u8; 32];
        shared.copy_from_slice(ss.as_slice());
        Ok((ct.to_vec(), SharedSecret(shared)))
    }

    /// Decapsulate a ciphertext produced by [`encapsulate`] against this
    /// keypair's public key.
    pub fn decapsulate(&self, ciphertext: &[u8]) -> Result<SharedSecret, CryptoError> {
        let ct = KemCiphertext::<MlKem1024>::try_from(ciphertext)
            .map_err(|_| CryptoError::KemDecapsulateFailed)?;
        let ss = self
            .decapsulation_key
            .decapsulate(&ct)
            .map_err(|_| CryptoError::KemDecapsulateFailed)?;
        let mut shared = [0u8; 32];
        shared.copy_from_slice(ss.as_slice());
        Ok(SharedSecret(shared))
    }

    pub const PUBLIC_KEY_LEN: usize = 1568;
    pub const CIPHERTEXT_LEN: usize = 1568;
}

/// ML-DSA-87 signing public key.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SigningPublicKey(Vec<u8>);

impl SigningPublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let encoded = EncodedVerifyingKey::<MlDsa87>::try_from(self.0.as_slice())
            .map_err(|_| CryptoError::SigVerifyFailed)?;
        let vk = ml_dsa::VerifyingKey::<MlDsa87>::decode(&encoded);
        let sig = MlDsaSignature::<MlDsa87>::try_from(signature)
            .map_err(|_| CryptoError::SigVerifyFailed)?;
        vk.verify(message, &sig)
            .map_err(|_| CryptoError::SigVerifyFailed)
    }
}

/// ML-DSA-87 keypair, deterministically generated from a 32-byte seed.
pub struct SigningKeypair {
    signing_key: ml_dsa::SigningKey<MlDsa87>,
    public: SigningPublicKey,
}

impl SigningKeypair {
    pub fn generate_from_seed(seed: &[u8; 32]) -> Result<Self, CryptoError> {
        let kp = MlDsa87::key_gen_internal(seed.into());
        let public = SigningPublicKey(kp.verifying_key().encode().to_vec());
        Ok(Self {
            signing_key: kp.signing_key().clone(),
            public,
        })
    }

    pub fn public_key(&self) -> &SigningPublicKey {
        &self.public
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let sig: MlDsaSignature<MlDsa87> = self.signing_key.sign(message);
        sig.encode().to_vec()
    }

    pub const PUBLIC_KEY_LEN: usize = 2592;
    pub const SIGNATURE_LEN: usize = 4627;
}

/// AES-256-GCM encrypt. Caller supplies a fresh, unpredictable 12-byte nonce
/// (the envelope format embeds it; see `crypto::envelope`).
pub fn aead_encrypt(
    key: &[u8; DEK_LEN],
    nonce: &[u8; 12],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AeadEncryptFailed)
}

/// AES-256-GCM decrypt; fails with `AeadDecryptFailed` on any tag mismatch.
pub fn aead_decrypt(
    key: &[u8; DEK_LEN],
    nonce: &[u8; 12],
    ciphertext_and_tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext_and_tag,
                aad,
            },
        )
        .map_err(|_| CryptoError::AeadDecryptFailed)
}

/// AES-KW wrap of a 32-byte DEK under a KEM shared secret (spec 4.2: "wrap
/// the DEK with the shared secret using AES-KW").
pub fn kw_wrap_dek(shared_secret: &SharedSecret, dek: &[u8; DEK_LEN]) -> Result<Vec<u8>, CryptoError> {
    let kek = Kek::from(*shared_secret.as_bytes());
    let mut wrapped = [0u8; DEK_LEN + 8];
    kek.wrap(dek, &mut wrapped)
        .map_err(|_| CryptoError::KeyWrapFailed)?;
    Ok(wrapped.to_vec())
}

pub fn kw_unwrap_dek(
    shared_secret: &SharedSecret,
    wrapped: &[u8],
) -> Result<[u8; DEK_LEN], CryptoError> {
    let kek = Kek::from(*shared_secret.as_bytes());
    let mut dek = [0u8; DEK_LEN];
    kek.unwrap(wrapped, &mut dek)
        .map_err(|_| CryptoError::KeyUnwrapFailed)?;
    Ok(dek)
}

/// Derive the 16-byte recipient match tag from a KEM shared secret (spec
/// 4.2: `HKDF(shared-secret, "match")[:16]`).
pub fn derive_match_tag(shared_secret: &SharedSecret) -> Result<[u8; MATCH_TAG_LEN], CryptoError> {
    hkdf_expand(shared_secret.as_bytes(), b"", b"match")
}

/// Fingerprint = `hex(SHA3-512(signing_pubkey || encryption_pubkey))`.
pub fn derive_fingerprint(signing: &SigningPublicKey, encryption: &EncryptionPublicKey) -> String {
    let mut buf = Vec::with_capacity(signing.as_bytes().len() + encryption.as_bytes().len());
    buf.extend_from_slice(signing.as_bytes());
    buf.extend_from_slice(encryption.as_bytes());
    hex::encode(sha3_512(&buf))
}

/// A version-4 (random) UUID built from this module's fail-closed entropy
/// source rather than `uuid::Uuid::new_v4`, whose own internal `getrandom`
/// call panics on failure instead of returning a `Result` (spec 3: "UUID v4
/// generated from platform secure random, fail-closed if unavailable").
pub fn secure_uuid_v4() -> Result<uuid::Uuid, CryptoError> {
    let mut bytes = random_array::<16>()?;
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    Ok(uuid::Uuid::from_bytes(bytes))
}

/// A `ChaCha20Rng` seeded from the crate's fail-closed entropy source. Used
/// wherever a primitive needs an `rand_core`-compatible RNG (KEM
/// encapsulation); never seeded from anything but [`random_array`].
pub fn secure_rng() -> Result<ChaCha20Rng, CryptoError> {
    let seed = random_array::<32>()?;
    Ok(ChaCha20Rng::from_seed(seed))
}

/// Shim module bridging the `rand_core` version pinned by `ml-kem` with the
/// one pinned by `rand_chacha` in this crate's dependency graph, mirroring
/// the teacher's own `rand_core = "0.9.3"  # For FrodoKEM compatibility
/// (separate from rand 0.8's rand_core 0.6)` split dependency comment.
pub mod rand_core_compat {
    pub use rand_core::CryptoRngCore;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_128_hex_chars() {
        let sig = SigningKeypair::generate_from_seed(&[1u8; 32]).unwrap();
        let enc = EncryptionKeypair::generate_from_seed(&[2u8; 32]).unwrap();
        let fp = derive_fingerprint(sig.public_key(), enc.public_key());
        assert_eq!(fp.len(), FINGERPRINT_HEX_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let sig = SigningKeypair::generate_from_seed(&[7u8; 32]).unwrap();
        let enc = EncryptionKeypair::generate_from_seed(&[9u8; 32]).unwrap();
        let fp_a = derive_fingerprint(sig.public_key(), enc.public_key());

        let sig2 = SigningKeypair::generate_from_seed(&[7u8; 32]).unwrap();
        let enc2 = EncryptionKeypair::generate_from_seed(&[9u8; 32]).unwrap();
        let fp_b = derive_fingerprint(sig2.public_key(), enc2.public_key());

        assert_eq!(fp_a, fp_b);
    }

    #[test]
    fn kem_round_trip() {
        let kp = EncryptionKeypair::generate_from_seed(&[3u8; 32]).unwrap();
        let mut rng = secure_rng().unwrap();
        let (ct, ss_a) = EncryptionKeypair::encapsulate(kp.public_key(), &mut rng).unwrap();
        let ss_b = kp.decapsulate(&ct).unwrap();
        assert_eq!(ss_a.as_bytes(), ss_b.as_bytes());
    }

    #[test]
    fn signature_round_trip() {
        let kp = SigningKeypair::generate_from_seed(&[4u8; 32]).unwrap();
        let msg = b"hello dna";
        let sig = kp.sign(msg);
        kp.public_key().verify(msg, &sig).unwrap();
    }

    #[test]
    fn signature_tamper_fails() {
        let kp = SigningKeypair::generate_from_seed(&[5u8; 32]).unwrap();
        let msg = b"hello dna";
        let mut sig = kp.sign(msg);
        sig[0] ^= 0xFF;
        assert!(kp.public_key().verify(msg, &sig).is_err());
    }

    #[test]
    fn aead_round_trip() {
        let key = [6u8; DEK_LEN];
        let nonce = [0u8; 12];
        let ct = aead_encrypt(&key, &nonce, b"plaintext", b"aad").unwrap();
        let pt = aead_decrypt(&key, &nonce, &ct, b"aad").unwrap();
        assert_eq!(pt, b"plaintext");
    }

    #[test]
    fn aead_bit_flip_fails() {
        let key = [6u8; DEK_LEN];
        let nonce = [0u8; 12];
        let mut ct = aead_encrypt(&key, &nonce, b"plaintext", b"aad").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(aead_decrypt(&key, &nonce, &ct, b"aad").is_err());
    }

    #[test]
    fn key_wrap_round_trip() {
        let ss = SharedSecret([8u8; 32]);
        let dek = [9u8; DEK_LEN];
        let wrapped = kw_wrap_dek(&ss, &dek).unwrap();
        let unwrapped = kw_unwrap_dek(&ss, &wrapped).unwrap();
        assert_eq!(dek, unwrapped);
    }

    #[test]
    fn secure_uuid_v4_has_correct_version_and_variant_bits() {
        let id = secure_uuid_v4().unwrap();
        assert_eq!(id.get_version_num(), 4);
        let bytes = id.as_bytes();
        assert_eq!(bytes[8] & 0xC0, 0x80);
    }

    #[test]
    fn secure_uuid_v4_is_not_constant() {
        let a = secure_uuid_v4().unwrap();
        let b = secure_uuid_v4().unwrap();
        assert_ne!(a, b);
    }
}
