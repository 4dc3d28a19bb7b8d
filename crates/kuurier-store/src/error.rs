use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("vault is locked — unlock with the account password first")]
    VaultLocked,

    #[error("crypto error: {0}")]
    Crypto(#[from] kuurier_crypto::CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("stored record failed schema validation: {0}")]
    Corrupted(String),

    #[error("migration error: {0}")]
    Migration(String),
}

/// Maps this crate's richer storage taxonomy onto the closed error sum
/// type the crypto core's `KeyStore` trait returns (spec §7 — the core's
/// error type is a closed taxonomy; it is not extended per-backend).
impl From<StoreError> for kuurier_crypto::CryptoError {
    fn from(err: StoreError) -> Self {
        use kuurier_crypto::CryptoError;
        match err {
            StoreError::Crypto(inner) => inner,
            StoreError::Corrupted(_) | StoreError::Serialization(_) => CryptoError::SessionCorrupted,
            StoreError::Database(_) | StoreError::Migration(_) | StoreError::VaultLocked | StoreError::NotFound(_) => {
                CryptoError::StorageUnavailable
            }
        }
    }
}
