//! Database row models — these map to/from the KeyStore schema in
//! `migrations/0001_init.sql`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdentityRow {
    pub id: i64,
    /// Vault-encrypted 32-byte Ed25519 signing seed.
    pub identity_secret_enc: String,
    pub registration_id: i64,
    pub schema_version: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SignedPreKeyRow {
    pub id: i64,
    pub public: Vec<u8>,
    pub signature: Vec<u8>,
    /// Vault-encrypted 32-byte X25519 secret.
    pub secret_enc: String,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OneTimePreKeyRow {
    pub id: i64,
    pub public: Vec<u8>,
    /// Vault-encrypted 32-byte X25519 secret.
    pub secret_enc: String,
    pub created_at: DateTime<Utc>,
}

/// One cached Double Ratchet session, keyed by peer id. `state_enc` holds
/// the vault-encrypted JSON serialization of `kuurier_crypto::RatchetState`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRow {
    pub peer_id: String,
    pub state_enc: String,
    pub schema_version: i64,
    pub updated_at: DateTime<Utc>,
}

/// The account's complete `channel_id -> OwnSenderKey` map, stored as a
/// single vault-encrypted JSON blob (spec §4.2 `store_own_sender_keys`
/// replaces the whole map atomically).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OwnSenderKeysRow {
    pub id: i64,
    pub map_enc: String,
    pub schema_version: i64,
    pub updated_at: DateTime<Utc>,
}
