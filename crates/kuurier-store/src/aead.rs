//! At-rest envelope encryption for vault-protected columns.
//!
//! XChaCha20-Poly1305 rather than the wire-layer's AES-256-GCM: a 24-byte
//! random nonce removes any need to track per-row nonce counters across
//! process restarts, which matters here because every encrypted column is
//! written independently.

use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    AeadCore, XChaCha20Poly1305, XNonce,
};

use crate::error::StoreError;

/// Encrypt `plaintext` under `key`, binding `aad`. Output is
/// `nonce(24) ‖ ciphertext+tag`.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, StoreError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).expect("key is exactly 32 bytes");
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, chacha20poly1305::aead::Payload { msg: plaintext, aad })
        .map_err(|_| StoreError::Corrupted("at-rest encryption failed".into()))?;

    let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a value produced by [`encrypt`] under the same `key` and `aad`.
pub fn decrypt(key: &[u8; 32], data: &[u8], aad: &[u8]) -> Result<Vec<u8>, StoreError> {
    if data.len() < 24 {
        return Err(StoreError::Corrupted("at-rest ciphertext too short".into()));
    }
    let (nonce_bytes, ciphertext) = data.split_at(24);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new_from_slice(key).expect("key is exactly 32 bytes");
    cipher
        .decrypt(nonce, chacha20poly1305::aead::Payload { msg: ciphertext, aad })
        .map_err(|_| StoreError::Corrupted("at-rest decryption failed (tag mismatch)".into()))
}
