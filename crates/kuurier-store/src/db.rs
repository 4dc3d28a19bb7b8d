//! SQLite-backed `KeyStore` (spec §4.2).
//!
//! Every column that carries long-term secret material is stored as
//! vault-encrypted (XChaCha20-Poly1305, see [`crate::aead`]) text, keyed by
//! the password-derived vault key — never plaintext. The identity secret
//! and signed/one-time pre-key secrets never leave this module except as
//! the derived X3DH outputs the `KeyStore` trait is allowed to return.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool},
    Row,
};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use kuurier_crypto::error::{CryptoError, Result as CryptoResult};
use kuurier_crypto::identity::{
    generate_registration_id, IdentityKeyPair, PreKeyBundle, PublicKeyBytes,
};
use kuurier_crypto::keystore::{KeyStore, PreKeyPublic, SignedPreKeyPublic};
use kuurier_crypto::ratchet::RatchetState;
use kuurier_crypto::sender_key::OwnSenderKey;
use kuurier_crypto::x3dh::{self, X3dhResult};

use crate::models::SCHEMA_VERSION;
use crate::{aead, error::StoreError, migrations, vault::Vault};

const IDENTITY_AAD: &[u8] = b"kuurier-store/identity-secret-v1";
const SIGNED_PREKEY_AAD: &[u8] = b"kuurier-store/signed-prekey-secret-v1";
const ONE_TIME_PREKEY_AAD: &[u8] = b"kuurier-store/one-time-prekey-secret-v1";
const SESSION_AAD: &[u8] = b"kuurier-store/session-state-v1";
const OWN_SENDER_KEYS_AAD: &[u8] = b"kuurier-store/own-sender-keys-v1";

/// Central store handle. Cheap to clone (`Arc` internally via `SqlitePool`
/// and `Vault`).
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
    pub vault: Vault,
}

impl Store {
    /// Open (or create) the SQLite database at `db_path` and run all
    /// pending migrations.
    ///
    /// WAL journal mode and foreign-key enforcement are configured at
    /// connection time, not inside a migration — SQLite forbids changing
    /// `journal_mode` inside a transaction, and every migration runs in
    /// one.
    pub async fn open(db_path: &Path, vault: Vault) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;
        migrations::run::run_migrations(&pool).await?;

        Ok(Self { pool, vault })
    }

    async fn encrypt_value(&self, plaintext: &[u8], aad: &[u8]) -> Result<String, StoreError> {
        self.vault
            .with_key(|key| {
                let ct = aead::encrypt(key, plaintext, aad)?;
                Ok(base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, &ct))
            })
            .await
    }

    async fn decrypt_value(&self, b64: &str, aad: &[u8]) -> Result<Vec<u8>, StoreError> {
        let ct = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, b64)
            .map_err(|e| StoreError::Corrupted(format!("bad base64 in vault column: {e}")))?;
        self.vault.with_key(|key| aead::decrypt(key, &ct, aad)).await
    }

    async fn load_identity(&self) -> Result<Option<(IdentityKeyPair, i64)>, StoreError> {
        let row = sqlx::query("SELECT identity_secret_enc, registration_id, schema_version FROM identity WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };

        let schema_version: i64 = row.try_get("schema_version")?;
        if schema_version != SCHEMA_VERSION {
            return Err(StoreError::Corrupted(format!("identity schema_version {schema_version} unrecognized")));
        }

        let secret_enc: String = row.try_get("identity_secret_enc")?;
        let registration_id: i64 = row.try_get("registration_id")?;
        let secret_bytes = self.decrypt_value(&secret_enc, IDENTITY_AAD).await?;
        let secret: [u8; 32] = secret_bytes
            .try_into()
            .map_err(|_| StoreError::Corrupted("identity secret wrong length".into()))?;

        Ok(Some((IdentityKeyPair::from_secret_bytes(secret), registration_id)))
    }

    async fn current_signed_prekey_secret(&self) -> Result<Option<(i64, StaticSecret)>, StoreError> {
        let row = sqlx::query("SELECT id, secret_enc FROM signed_prekeys WHERE is_current = 1 LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };

        let id: i64 = row.try_get("id")?;
        let secret_enc: String = row.try_get("secret_enc")?;
        let secret_bytes = self.decrypt_value(&secret_enc, SIGNED_PREKEY_AAD).await?;
        let secret: [u8; 32] = secret_bytes
            .try_into()
            .map_err(|_| StoreError::Corrupted("signed pre-key secret wrong length".into()))?;
        Ok(Some((id, StaticSecret::from(secret))))
    }

    /// Remove and return the one-time pre-key row with `id`, if present.
    async fn take_one_time_prekey(&self, id: i64) -> Result<Option<(Vec<u8>, String)>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT public, secret_enc FROM one_time_prekeys WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        sqlx::query("DELETE FROM one_time_prekeys WHERE id = ?").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;

        let public: Vec<u8> = row.try_get("public")?;
        let secret_enc: String = row.try_get("secret_enc")?;
        Ok(Some((public, secret_enc)))
    }
}

#[async_trait]
impl KeyStore for Store {
    async fn ensure_identity(&self) -> CryptoResult<()> {
        if self.load_identity().await.map_err(CryptoError::from)?.is_some() {
            return Ok(());
        }

        let identity = IdentityKeyPair::generate();
        let registration_id = generate_registration_id();
        let secret_enc = self
            .encrypt_value(identity.secret_bytes(), IDENTITY_AAD)
            .await
            .map_err(CryptoError::from)?;

        sqlx::query(
            "INSERT OR IGNORE INTO identity (id, identity_secret_enc, registration_id, schema_version, created_at) VALUES (1, ?, ?, ?, ?)",
        )
        .bind(&secret_enc)
        .bind(registration_id as i64)
        .bind(SCHEMA_VERSION)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)
        .map_err(CryptoError::from)?;

        Ok(())
    }

    async fn identity_public(&self) -> CryptoResult<PublicKeyBytes> {
        let (identity, _) = self.load_identity().await.map_err(CryptoError::from)?.ok_or(CryptoError::NoIdentity)?;
        Ok(identity.public)
    }

    async fn rotate_signed_prekey(&self) -> CryptoResult<SignedPreKeyPublic> {
        let (identity, _) = self.load_identity().await.map_err(CryptoError::from)?.ok_or(CryptoError::NoIdentity)?;

        let next_id: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) + 1 FROM signed_prekeys")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)
            .map_err(CryptoError::from)?;

        let spk = kuurier_crypto::identity::SignedPreKey::generate(next_id as u32, &identity, Utc::now().timestamp());
        let secret_enc = self.encrypt_value(&spk.secret().to_bytes(), SIGNED_PREKEY_AAD).await.map_err(CryptoError::from)?;

        let mut tx = self.pool.begin().await.map_err(StoreError::from).map_err(CryptoError::from)?;
        sqlx::query("UPDATE signed_prekeys SET is_current = 0")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)
            .map_err(CryptoError::from)?;
        sqlx::query(
            "INSERT INTO signed_prekeys (id, public, signature, secret_enc, is_current, created_at) VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(spk.id as i64)
        .bind(spk.public.as_bytes().to_vec())
        .bind(spk.signature.to_vec())
        .bind(&secret_enc)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)
        .map_err(CryptoError::from)?;
        tx.commit().await.map_err(StoreError::from).map_err(CryptoError::from)?;

        Ok(SignedPreKeyPublic { id: spk.id, public: *spk.public.as_bytes(), signature: spk.signature })
    }

    async fn current_signed_prekey(&self) -> CryptoResult<SignedPreKeyPublic> {
        let row = sqlx::query("SELECT id, public, signature FROM signed_prekeys WHERE is_current = 1 LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)
            .map_err(CryptoError::from)?
            .ok_or(CryptoError::NoIdentity)?;

        let id: i64 = row.try_get("id").map_err(StoreError::from).map_err(CryptoError::from)?;
        let public: Vec<u8> = row.try_get("public").map_err(StoreError::from).map_err(CryptoError::from)?;
        let signature: Vec<u8> = row.try_get("signature").map_err(StoreError::from).map_err(CryptoError::from)?;

        let public: [u8; 32] = public.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        let signature: [u8; 64] = signature.try_into().map_err(|_| CryptoError::InvalidMessage)?;
        Ok(SignedPreKeyPublic { id: id as u32, public, signature })
    }

    async fn generate_prekeys(&self, start_id: u32, n: u32) -> CryptoResult<Vec<PreKeyPublic>> {
        let keys = kuurier_crypto::identity::generate_one_time_prekeys(start_id, n);
        let mut out = Vec::with_capacity(keys.len());

        let mut tx = self.pool.begin().await.map_err(StoreError::from).map_err(CryptoError::from)?;
        for key in &keys {
            let secret_enc = self.encrypt_value(&key.secret().to_bytes(), ONE_TIME_PREKEY_AAD).await.map_err(CryptoError::from)?;
            sqlx::query("INSERT INTO one_time_prekeys (id, public, secret_enc, created_at) VALUES (?, ?, ?, ?)")
                .bind(key.id as i64)
                .bind(key.public.as_bytes().to_vec())
                .bind(&secret_enc)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)
                .map_err(CryptoError::from)?;
            out.push(PreKeyPublic { id: key.id, public: *key.public.as_bytes() });
        }
        tx.commit().await.map_err(StoreError::from).map_err(CryptoError::from)?;
        Ok(out)
    }

    async fn consume_prekey(&self, id: u32) -> CryptoResult<Option<PreKeyPublic>> {
        match self.take_one_time_prekey(id as i64).await.map_err(CryptoError::from)? {
            Some((public, _)) => {
                let public: [u8; 32] = public.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
                Ok(Some(PreKeyPublic { id, public }))
            }
            None => Ok(None),
        }
    }

    async fn count_prekeys(&self) -> CryptoResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM one_time_prekeys")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)
            .map_err(CryptoError::from)?;
        Ok(count as usize)
    }

    async fn load_session(&self, peer_id: &str) -> CryptoResult<Option<RatchetState>> {
        let row = sqlx::query("SELECT state_enc, schema_version FROM sessions WHERE peer_id = ?")
            .bind(peer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)
            .map_err(CryptoError::from)?;
        let Some(row) = row else { return Ok(None) };

        let schema_version: i64 = row.try_get("schema_version").map_err(StoreError::from).map_err(CryptoError::from)?;
        if schema_version != SCHEMA_VERSION {
            return Err(StoreError::Corrupted(format!("session schema_version {schema_version} unrecognized")).into());
        }

        let state_enc: String = row.try_get("state_enc").map_err(StoreError::from).map_err(CryptoError::from)?;
        let plaintext = self.decrypt_value(&state_enc, SESSION_AAD).await.map_err(CryptoError::from)?;
        let state: RatchetState = serde_json::from_slice(&plaintext).map_err(StoreError::from).map_err(CryptoError::from)?;
        Ok(Some(state))
    }

    async fn store_session(&self, peer_id: &str, state: &RatchetState) -> CryptoResult<()> {
        let plaintext = serde_json::to_vec(state).map_err(StoreError::from).map_err(CryptoError::from)?;
        let state_enc = self.encrypt_value(&plaintext, SESSION_AAD).await.map_err(CryptoError::from)?;

        sqlx::query(
            "INSERT INTO sessions (peer_id, state_enc, schema_version, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(peer_id) DO UPDATE SET state_enc = excluded.state_enc, schema_version = excluded.schema_version, updated_at = excluded.updated_at",
        )
        .bind(peer_id)
        .bind(&state_enc)
        .bind(SCHEMA_VERSION)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)
        .map_err(CryptoError::from)?;
        Ok(())
    }

    async fn delete_session(&self, peer_id: &str) -> CryptoResult<()> {
        sqlx::query("DELETE FROM sessions WHERE peer_id = ?")
            .bind(peer_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)
            .map_err(CryptoError::from)?;
        Ok(())
    }

    async fn load_own_sender_keys(&self) -> CryptoResult<HashMap<String, OwnSenderKey>> {
        let row = sqlx::query("SELECT map_enc, schema_version FROM own_sender_keys WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)
            .map_err(CryptoError::from)?;
        let Some(row) = row else { return Ok(HashMap::new()) };

        let schema_version: i64 = row.try_get("schema_version").map_err(StoreError::from).map_err(CryptoError::from)?;
        if schema_version != SCHEMA_VERSION {
            return Err(StoreError::Corrupted(format!("own_sender_keys schema_version {schema_version} unrecognized")).into());
        }

        let map_enc: String = row.try_get("map_enc").map_err(StoreError::from).map_err(CryptoError::from)?;
        let plaintext = self.decrypt_value(&map_enc, OWN_SENDER_KEYS_AAD).await.map_err(CryptoError::from)?;
        let map: HashMap<String, OwnSenderKey> =
            serde_json::from_slice(&plaintext).map_err(StoreError::from).map_err(CryptoError::from)?;
        Ok(map)
    }

    async fn store_own_sender_keys(&self, keys: &HashMap<String, OwnSenderKey>) -> CryptoResult<()> {
        let plaintext = serde_json::to_vec(keys).map_err(StoreError::from).map_err(CryptoError::from)?;
        let map_enc = self.encrypt_value(&plaintext, OWN_SENDER_KEYS_AAD).await.map_err(CryptoError::from)?;

        sqlx::query(
            "INSERT INTO own_sender_keys (id, map_enc, schema_version, updated_at) VALUES (1, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET map_enc = excluded.map_enc, schema_version = excluded.schema_version, updated_at = excluded.updated_at",
        )
        .bind(&map_enc)
        .bind(SCHEMA_VERSION)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)
        .map_err(CryptoError::from)?;
        Ok(())
    }

    async fn clear_all(&self) -> CryptoResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from).map_err(CryptoError::from)?;
        for table in ["identity", "signed_prekeys", "one_time_prekeys", "sessions", "own_sender_keys"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)
                .map_err(CryptoError::from)?;
        }
        tx.commit().await.map_err(StoreError::from).map_err(CryptoError::from)?;
        Ok(())
    }

    async fn initiate_x3dh(&self, bundle: &PreKeyBundle) -> CryptoResult<X3dhResult> {
        let (identity, _) = self.load_identity().await.map_err(CryptoError::from)?.ok_or(CryptoError::NoIdentity)?;
        x3dh::initiate(&identity, bundle)
    }

    async fn respond_x3dh(
        &self,
        peer_identity_pub: &PublicKeyBytes,
        peer_ephemeral_public: &X25519Public,
        one_time_prekey_id: Option<u32>,
    ) -> CryptoResult<RatchetState> {
        let (identity, _) = self.load_identity().await.map_err(CryptoError::from)?.ok_or(CryptoError::NoIdentity)?;
        let (_, spk_secret) = self.current_signed_prekey_secret().await.map_err(CryptoError::from)?.ok_or(CryptoError::NoIdentity)?;

        let otk_secret = match one_time_prekey_id {
            Some(id) => match self.take_one_time_prekey(id as i64).await.map_err(CryptoError::from)? {
                Some((_, secret_enc)) => {
                    let bytes = self.decrypt_value(&secret_enc, ONE_TIME_PREKEY_AAD).await.map_err(CryptoError::from)?;
                    let secret: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
                    Some(StaticSecret::from(secret))
                }
                None => None,
            },
            None => None,
        };

        let master_secret = x3dh::respond(
            &identity,
            &spk_secret,
            otk_secret.as_ref(),
            peer_identity_pub,
            peer_ephemeral_public,
        )?;

        Ok(RatchetState::init_as_responder(master_secret, &spk_secret))
    }
}
