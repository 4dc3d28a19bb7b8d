//! Identity keys, registration ids, and pre-key material (spec §3).
//!
//! Design commitment (spec §3 / §9 open question): a single 32-byte secret
//! backs both interpretations required by the protocol — an Ed25519
//! signing key used as-is, and an X25519 key-agreement key derived from it
//! via the standard SHA-512-clamp birational map. Both the initiator and
//! the responder derive the X25519 form the same way, so the X3DH DH set
//! agrees on both ends.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};
use crate::primitives;

/// A 32-byte public key (Ed25519 identity key or X25519 key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(pub [u8; 32]);

impl PublicKeyBytes {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(arr))
    }

    /// Human-readable fingerprint: BLAKE3 of the public key, truncated to
    /// 20 bytes (160 bits), hex-encoded in groups of 4 for manual
    /// comparison.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..20]);
        hex.chars()
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|c| c.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Numeric safety-number form: 12 groups of 5 digits, matching the
    /// common Signal safety-number layout.
    pub fn numeric_fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let bytes = hash.as_bytes();
        let mut groups = Vec::with_capacity(12);
        for i in 0..12 {
            let offset = i * 5 / 2;
            let val = if i % 2 == 0 {
                ((bytes[offset] as u32) << 12)
                    | ((bytes[offset + 1] as u32) << 4)
                    | ((bytes[offset + 2] as u32) >> 4)
            } else {
                (((bytes[offset] & 0x0F) as u32) << 16)
                    | ((bytes[offset + 1] as u32) << 8)
                    | (bytes[offset + 2] as u32)
            };
            groups.push(format!("{:05}", val % 100_000));
        }
        groups.join(" ")
    }

    /// Constant-time fingerprint comparison, used for manual safety-number
    /// verification flows and identity pin checks.
    pub fn fingerprints_match(&self, other: &PublicKeyBytes) -> bool {
        let h1 = blake3::hash(&self.0);
        let h2 = blake3::hash(&other.0);
        primitives::constant_time_eq(h1.as_bytes(), h2.as_bytes())
    }
}

/// Convert a 32-byte Ed25519 signing seed into an X25519 static secret via
/// the SHA-512-clamp expansion (RFC 7748 §5 clamping on the low half of
/// the hash).
pub fn ed25519_secret_to_x25519(ed_secret: &[u8; 32]) -> StaticSecret {
    let mut h = Sha512::digest(ed_secret);
    h[0] &= 248;
    h[31] &= 127;
    h[31] |= 64;
    let mut key = [0u8; 32];
    key.copy_from_slice(&h[..32]);
    h.as_mut_slice().zeroize();
    StaticSecret::from(key)
}

/// Convert an Ed25519 public key into its X25519 (Montgomery) form via the
/// birational map between the twisted Edwards and Montgomery curves.
pub fn ed25519_pub_to_x25519(ed_pub: &PublicKeyBytes) -> Result<X25519Public> {
    use curve25519_dalek::edwards::CompressedEdwardsY;
    let compressed =
        CompressedEdwardsY::from_slice(&ed_pub.0).map_err(|_| CryptoError::InvalidPublicKey)?;
    let point = compressed.decompress().ok_or(CryptoError::InvalidPublicKey)?;
    Ok(X25519Public::from(point.to_montgomery().to_bytes()))
}

/// Long-term identity key. One secret, two interpretations (see module
/// docs). Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    pub public: PublicKeyBytes,
    secret_bytes: [u8; 32],
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = PublicKeyBytes(signing_key.verifying_key().to_bytes());
        Self { public, secret_bytes: signing_key.to_bytes() }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&bytes);
        let public = PublicKeyBytes(signing_key.verifying_key().to_bytes());
        Self { public, secret_bytes: bytes }
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_bytes
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.secret_bytes)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key().verifying_key()
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        primitives::ed25519_sign(&self.signing_key(), msg)
    }

    /// Verify a signature made by an arbitrary Ed25519 public key.
    pub fn verify(public: &PublicKeyBytes, msg: &[u8], sig: &[u8; 64]) -> Result<()> {
        let vk = VerifyingKey::from_bytes(&public.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        if primitives::ed25519_verify(&vk, msg, sig) {
            Ok(())
        } else {
            Err(CryptoError::SignatureInvalid)
        }
    }

    /// This identity's X25519 key-agreement secret, derived per the single
    /// committed representation.
    pub fn x25519_secret(&self) -> StaticSecret {
        ed25519_secret_to_x25519(&self.secret_bytes)
    }

    pub fn x25519_public(&self) -> Result<X25519Public> {
        ed25519_pub_to_x25519(&self.public)
    }
}

/// A 14-bit registration id, chosen uniformly at account initialization and
/// used to detect peer reinstalls.
pub fn generate_registration_id() -> u16 {
    (OsRng.next_u32() % 16_384) as u16
}

/// Signed pre-key: an X25519 key pair plus an Ed25519 signature by the
/// identity key over the public X25519 bytes, rotated periodically.
#[derive(ZeroizeOnDrop)]
pub struct SignedPreKey {
    pub id: u32,
    secret: [u8; 32],
    #[zeroize(skip)]
    pub public: X25519Public,
    #[zeroize(skip)]
    pub signature: [u8; 64],
    #[zeroize(skip)]
    pub created_at_unix: i64,
}

impl SignedPreKey {
    pub fn generate(id: u32, identity: &IdentityKeyPair, created_at_unix: i64) -> Self {
        let (secret, public) = primitives::x25519_keypair();
        let signature = identity.sign(public.as_bytes());
        Self { id, secret: secret.to_bytes(), public, signature, created_at_unix }
    }

    pub fn secret(&self) -> StaticSecret {
        StaticSecret::from(self.secret)
    }

    /// Verify this pre-key's signature against a claimed identity public
    /// key. The caller (X3DH initiator) must never treat a server-supplied
    /// bundle as pre-validated.
    pub fn verify_signature(
        identity_public: &PublicKeyBytes,
        public: &X25519Public,
        signature: &[u8; 64],
    ) -> Result<()> {
        IdentityKeyPair::verify(identity_public, public.as_bytes(), signature)
    }
}

/// One-time pre-key: an X25519 key pair with an id, consumed once per
/// session initiation and then deleted from the directory.
#[derive(ZeroizeOnDrop)]
pub struct OneTimePreKey {
    pub id: u32,
    secret: [u8; 32],
    #[zeroize(skip)]
    pub public: X25519Public,
}

impl OneTimePreKey {
    pub fn generate(id: u32) -> Self {
        let (secret, public) = primitives::x25519_keypair();
        Self { id, secret: secret.to_bytes(), public }
    }

    pub fn secret(&self) -> StaticSecret {
        StaticSecret::from(self.secret)
    }
}

/// Batch-generate `n` one-time pre-keys starting at `start_id`.
pub fn generate_one_time_prekeys(start_id: u32, n: u32) -> Vec<OneTimePreKey> {
    (0..n).map(|i| OneTimePreKey::generate(start_id + i)).collect()
}

/// Peer pre-key bundle, as fetched from the directory (spec §3 / §6.1).
/// Not persisted by the core — it exists only for the duration of an
/// X3DH handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyBundle {
    pub peer_id: String,
    pub registration_id: u16,
    pub identity_public: PublicKeyBytes,
    pub signed_prekey_id: u32,
    pub signed_prekey_public: [u8; 32],
    #[serde(with = "crate::serde_sig64")]
    pub signed_prekey_signature: [u8; 64],
    pub one_time_prekey_id: Option<u32>,
    pub one_time_prekey_public: Option<[u8; 32]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_id_is_14_bit() {
        for _ in 0..1000 {
            assert!(generate_registration_id() < 16_384);
        }
    }

    #[test]
    fn signed_prekey_signature_verifies() {
        let identity = IdentityKeyPair::generate();
        let spk = SignedPreKey::generate(1, &identity, 0);
        assert!(SignedPreKey::verify_signature(&identity.public, &spk.public, &spk.signature).is_ok());
    }

    #[test]
    fn signed_prekey_signature_rejects_wrong_identity() {
        let identity = IdentityKeyPair::generate();
        let other = IdentityKeyPair::generate();
        let spk = SignedPreKey::generate(1, &identity, 0);
        assert!(SignedPreKey::verify_signature(&other.public, &spk.public, &spk.signature).is_err());
    }

    #[test]
    fn x25519_conversion_round_trips_agreement() {
        let alice = IdentityKeyPair::generate();
        let (bob_secret, bob_public) = primitives::x25519_keypair();

        let alice_x_secret = alice.x25519_secret();
        let alice_x_public = alice.x25519_public().unwrap();

        let shared_alice = alice_x_secret.diffie_hellman(&bob_public);
        let shared_bob = bob_secret.diffie_hellman(&alice_x_public);
        assert_eq!(shared_alice.as_bytes(), shared_bob.as_bytes());
    }

    #[test]
    fn fingerprint_is_stable_and_self_matching() {
        let id = IdentityKeyPair::generate();
        let fp1 = id.public.fingerprint();
        let fp2 = id.public.fingerprint();
        assert_eq!(fp1, fp2);
        assert!(id.public.fingerprints_match(&id.public));
    }

    #[test]
    fn fingerprints_differ_for_distinct_keys() {
        let a = IdentityKeyPair::generate();
        let b = IdentityKeyPair::generate();
        assert!(!a.public.fingerprints_match(&b.public));
    }
}
