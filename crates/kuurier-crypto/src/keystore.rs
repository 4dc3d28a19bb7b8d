//! Capability interfaces for persistence and the key-bundle directory
//! (spec §4.2, §6.1).
//!
//! The core never talks to a database or a server directly; it is built
//! against these two traits and a caller supplies concrete
//! implementations (`kuurier-store` backs `KeyStore`, the application's
//! transport layer backs `Directory`). This is the constructor-injection
//! design note carried through from the source's singleton services.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use x25519_dalek::PublicKey as X25519Public;

use crate::error::Result;
use crate::identity::{PreKeyBundle, PublicKeyBytes};
use crate::ratchet::RatchetState;
use crate::sender_key::OwnSenderKey;
use crate::x3dh::X3dhResult;

/// Public half of a signed pre-key, as exposed by the `KeyStore`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignedPreKeyPublic {
    pub id: u32,
    pub public: [u8; 32],
    #[serde(with = "crate::serde_sig64")]
    pub signature: [u8; 64],
}

/// Public half of a one-time pre-key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PreKeyPublic {
    pub id: u32,
    pub public: [u8; 32],
}

/// Exclusive owner of persistent cryptographic state (spec §4.2).
/// Operations are logically atomic: a read observes either the pre- or
/// post-state of any concurrent write, never a torn record.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Create the identity key and registration id if absent. Idempotent.
    async fn ensure_identity(&self) -> Result<()>;

    async fn identity_public(&self) -> Result<PublicKeyBytes>;

    /// Generate a new signed pre-key, sign it with the identity key, and
    /// store it under a fresh id, superseding the previous current key.
    async fn rotate_signed_prekey(&self) -> Result<SignedPreKeyPublic>;

    async fn current_signed_prekey(&self) -> Result<SignedPreKeyPublic>;

    /// Generate `n` one-time pre-keys starting at `start_id`, append them
    /// to the pool, and return their public halves.
    async fn generate_prekeys(&self, start_id: u32, n: u32) -> Result<Vec<PreKeyPublic>>;

    /// Remove and return the one-time pre-key with `id`, if present.
    /// Consumption is one-shot: a second call for the same id returns
    /// `None`.
    async fn consume_prekey(&self, id: u32) -> Result<Option<PreKeyPublic>>;

    async fn count_prekeys(&self) -> Result<usize>;

    async fn load_session(&self, peer_id: &str) -> Result<Option<RatchetState>>;

    async fn store_session(&self, peer_id: &str, state: &RatchetState) -> Result<()>;

    async fn delete_session(&self, peer_id: &str) -> Result<()>;

    async fn load_own_sender_keys(&self) -> Result<HashMap<String, OwnSenderKey>>;

    async fn store_own_sender_keys(&self, keys: &HashMap<String, OwnSenderKey>) -> Result<()>;

    /// Duress wipe: destroys all material. Irreversible.
    async fn clear_all(&self) -> Result<()>;

    /// Run the X3DH initiator half against `bundle` using the identity
    /// secret this store owns. Only the derived master secret and
    /// ephemeral public cross back out; the identity and ephemeral
    /// secrets never leave the store.
    async fn initiate_x3dh(&self, bundle: &PreKeyBundle) -> Result<X3dhResult>;

    /// Run the X3DH responder half against an inbound handshake, using
    /// the current signed pre-key and (if referenced) the one-time
    /// pre-key `one_time_prekey_id`, and build the resulting session's
    /// initial `RatchetState`. The store must remove the referenced
    /// one-time pre-key before returning, so a retried or duplicated
    /// handshake cannot consume it twice. Returning a fully-formed
    /// `RatchetState` (rather than the bare master secret) keeps the
    /// signed pre-key's raw secret — which seeds the ratchet's own
    /// key pair — from ever crossing this trait boundary.
    async fn respond_x3dh(
        &self,
        peer_identity_pub: &PublicKeyBytes,
        peer_ephemeral_public: &X25519Public,
        one_time_prekey_id: Option<u32>,
    ) -> Result<RatchetState>;
}

/// A peer's pre-key bundle as published to the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryBundle {
    pub identity_public: PublicKeyBytes,
    pub registration_id: u16,
    pub signed_prekey: SignedPreKeyPublic,
    pub one_time_prekey: Option<PreKeyPublic>,
}

/// An encrypted sender-key distribution as stored on the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedSenderKeyEntry {
    pub sender_id: String,
    pub distribution_id: [u8; 16],
    pub ciphertext: Vec<u8>,
}

/// Key-bundle directory operations consumed from the external transport
/// component (spec §6.1). The core never depends on any particular wire
/// encoding here — only on the byte fields defined in §3 surviving the
/// round trip losslessly.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn publish_identity_and_prekeys(
        &self,
        identity_public: PublicKeyBytes,
        registration_id: u16,
        signed_prekey: SignedPreKeyPublic,
        one_time_prekeys: Vec<PreKeyPublic>,
    ) -> Result<()>;

    async fn publish_one_time_prekeys(&self, prekeys: Vec<PreKeyPublic>) -> Result<()>;

    async fn rotate_signed_prekey(&self, signed_prekey: SignedPreKeyPublic) -> Result<()>;

    /// May consume one of the peer's one-time pre-keys server-side.
    async fn fetch_bundle(&self, peer_id: &str) -> Result<DirectoryBundle>;

    async fn publish_encrypted_sender_key(
        &self,
        channel_id: &str,
        distribution_id: [u8; 16],
        recipients: Vec<(String, Vec<u8>)>,
    ) -> Result<()>;

    async fn fetch_encrypted_sender_keys(&self, channel_id: &str) -> Result<Vec<EncryptedSenderKeyEntry>>;

    async fn channel_members(&self, channel_id: &str) -> Result<Vec<String>>;

    /// `(count, below_low_water_mark)`.
    async fn prekey_count(&self) -> Result<(usize, bool)>;
}
