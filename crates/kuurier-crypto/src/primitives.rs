//! C1 — primitive layer.
//!
//! A small, panic-free facade over well-audited library primitives. No
//! custom crypto is implemented here; every function below forwards to
//! `x25519-dalek`, `ed25519-dalek`, `hkdf`, `hmac`, or `aes-gcm`.
//!
//! All key material that passes through this module is handled as fixed
//! arrays and zeroized by its owning type on drop (see `identity.rs`,
//! `ratchet.rs`, `sender_key.rs`); this module itself is stateless.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::error::{CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Generate a fresh X25519 key pair.
pub fn x25519_keypair() -> (StaticSecret, X25519Public) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&secret);
    (secret, public)
}

/// Diffie-Hellman agreement. Fails if the peer's public key is a low-order
/// point, which would otherwise yield an all-zero (or small-subgroup)
/// shared secret usable to forge agreement.
pub fn x25519_agree(private: &StaticSecret, public: &X25519Public) -> Result<[u8; 32]> {
    let shared = private.diffie_hellman(public);
    if is_low_order(shared.as_bytes()) {
        return Err(CryptoError::AgreementFailed);
    }
    Ok(*shared.as_bytes())
}

/// Contributory-behavior check: reject DH outputs that are all-zero, which
/// is what you get when the peer supplies a low-order point on the curve.
fn is_low_order(dh_output: &[u8; 32]) -> bool {
    dh_output.iter().all(|&b| b == 0)
}

/// Sign arbitrary bytes with an Ed25519 key; returns a 64-byte signature.
pub fn ed25519_sign(signing_key: &SigningKey, msg: &[u8]) -> [u8; 64] {
    signing_key.sign(msg).to_bytes()
}

/// Verify an Ed25519 signature in constant time relative to whether the
/// signature is valid. `ed25519-dalek`'s `verify` already runs in constant
/// time w.r.t. the comparison; the caller must still avoid branching on
/// the `bool` before comparing it against the expected outcome — see
/// `constant_time_eq` for the branch-free pattern used by callers that
/// fold this into a larger decision (e.g. X3DH's SPK check).
pub fn ed25519_verify(public: &VerifyingKey, msg: &[u8], sig: &[u8; 64]) -> bool {
    let signature = Signature::from_bytes(sig);
    public.verify(msg, &signature).is_ok()
}

/// HKDF-SHA-256 with the salt fixed to 32 zero bytes unless the caller
/// supplies one explicitly.
pub fn hkdf_sha256(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], out: &mut [u8]) -> Result<()> {
    let zero_salt = [0u8; 32];
    let hk = Hkdf::<Sha256>::new(Some(salt.unwrap_or(&zero_salt)), ikm);
    hk.expand(info, out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Convenience wrapper returning a fixed 32-byte HKDF output.
pub fn hkdf_sha256_32(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> Result<[u8; 32]> {
    let mut out = [0u8; 32];
    hkdf_sha256(ikm, salt, info, &mut out)?;
    Ok(out)
}

/// HMAC-SHA-256, used by the Double Ratchet's chain-key derivation.
pub fn hmac_sha256(key: &[u8; 32], msg: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// AES-256-GCM seal. `nonce` must be 12 bytes and used at most once per key.
/// Returns `ciphertext || tag`.
pub fn aes256_gcm_seal(
    key: &[u8; 32],
    nonce: &[u8; 12],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// AES-256-GCM open. `combined` is `ciphertext || tag`.
pub fn aes256_gcm_open(
    key: &[u8; 32],
    nonce: &[u8; 12],
    aad: &[u8],
    combined: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: combined, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Constant-time byte comparison, used for all secret and identity-key
/// comparisons (signature verification outcomes, identity pinning).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
