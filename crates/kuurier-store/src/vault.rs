//! Vault: in-memory database encryption key, unlocked by the account
//! password.
//!
//! The vault holds the 32-byte key that [`crate::aead`] uses to wrap every
//! secret-bearing column before it reaches SQLite. Deriving it is the only
//! job of this module — inactivity timers and re-lock policy are
//! application-layer concerns this crate does not implement.

use std::sync::Arc;

use argon2::{Argon2, Params, Version};
use rand::RngCore;
use tokio::sync::RwLock;
use zeroize::ZeroizeOnDrop;

use crate::error::StoreError;

#[derive(ZeroizeOnDrop)]
struct VaultInner {
    key: [u8; 32],
}

/// Thread-safe vault handle. Cheap to clone (`Arc` internally).
#[derive(Clone)]
pub struct Vault {
    inner: Arc<RwLock<Option<VaultInner>>>,
}

impl Vault {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(None)) }
    }

    /// Unlock the vault with the account password and its stored salt.
    /// Call once before any `KeyStore` read or write.
    pub async fn unlock(&self, password: &[u8], salt: &[u8; 16]) -> Result<(), StoreError> {
        let key = vault_key_from_password(password, salt)?;
        let mut guard = self.inner.write().await;
        *guard = Some(VaultInner { key });
        Ok(())
    }

    /// Lock the vault — zeroizes the key.
    pub async fn lock(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }

    pub async fn is_locked(&self) -> bool {
        self.inner.read().await.is_none()
    }

    /// Access the raw key for an encrypt/decrypt operation. Returns
    /// `VaultLocked` if `unlock` has not been called.
    pub async fn with_key<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&[u8; 32]) -> Result<R, StoreError>,
    {
        let guard = self.inner.read().await;
        match guard.as_ref() {
            Some(inner) => f(&inner.key),
            None => Err(StoreError::VaultLocked),
        }
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}

/// Argon2id parameters tuned for interactive (desktop/mobile) unlock.
fn argon2_params() -> Params {
    Params::new(
        64 * 1024, // m_cost: 64 MiB
        3,         // t_cost: 3 iterations
        1,         // p_cost: 1 thread
        Some(32),
    )
    .expect("static Argon2 params are always valid")
}

/// Derive the 32-byte vault key from the account password and a 16-byte
/// salt stored alongside the database (not secret).
pub fn vault_key_from_password(password: &[u8], salt: &[u8; 16]) -> Result<[u8; 32], StoreError> {
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params());
    let mut output = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| StoreError::Corrupted(format!("vault key derivation failed: {e}")))?;
    Ok(output)
}

/// Generate a fresh random 16-byte salt for a new account.
pub fn new_vault_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locked_by_default_and_unlock_enables_with_key() {
        let vault = Vault::new();
        assert!(vault.is_locked().await);
        assert!(matches!(vault.with_key(|_| Ok(())).await, Err(StoreError::VaultLocked)));

        let salt = new_vault_salt();
        vault.unlock(b"correct horse battery staple", &salt).await.unwrap();
        assert!(!vault.is_locked().await);
        vault.with_key(|k| { assert_eq!(k.len(), 32); Ok(()) }).await.unwrap();
    }

    #[tokio::test]
    async fn lock_zeroizes_and_blocks_access_again() {
        let vault = Vault::new();
        let salt = new_vault_salt();
        vault.unlock(b"pw", &salt).await.unwrap();
        vault.lock().await;
        assert!(vault.is_locked().await);
        assert!(matches!(vault.with_key(|_| Ok(())).await, Err(StoreError::VaultLocked)));
    }

    #[tokio::test]
    async fn same_password_and_salt_derive_the_same_key() {
        let salt = new_vault_salt();
        let k1 = vault_key_from_password(b"hunter2", &salt).unwrap();
        let k2 = vault_key_from_password(b"hunter2", &salt).unwrap();
        assert_eq!(k1, k2);
    }
}
