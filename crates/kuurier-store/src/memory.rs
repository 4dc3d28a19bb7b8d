//! In-memory `KeyStore`, for tests and the `SessionManager` test suite in
//! `kuurier-crypto`. No at-rest encryption — there is nothing "at rest".

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use kuurier_crypto::error::{CryptoError, Result as CryptoResult};
use kuurier_crypto::identity::{
    generate_one_time_prekeys, generate_registration_id, IdentityKeyPair, PreKeyBundle, PublicKeyBytes, SignedPreKey,
};
use kuurier_crypto::keystore::{KeyStore, PreKeyPublic, SignedPreKeyPublic};
use kuurier_crypto::ratchet::RatchetState;
use kuurier_crypto::sender_key::OwnSenderKey;
use kuurier_crypto::x3dh::{self, X3dhResult};

struct Inner {
    identity: Option<IdentityKeyPair>,
    registration_id: u16,
    signed_prekeys: HashMap<u32, SignedPreKey>,
    current_signed_prekey_id: Option<u32>,
    one_time_prekeys: HashMap<u32, kuurier_crypto::identity::OneTimePreKey>,
    next_one_time_id: u32,
    sessions: HashMap<String, RatchetState>,
    own_sender_keys: HashMap<String, OwnSenderKey>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            identity: None,
            registration_id: 0,
            signed_prekeys: HashMap::new(),
            current_signed_prekey_id: None,
            one_time_prekeys: HashMap::new(),
            next_one_time_id: 1,
            sessions: HashMap::new(),
            own_sender_keys: HashMap::new(),
        }
    }
}

/// An in-process `KeyStore`. Cheap to clone (`Arc` internally).
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn ensure_identity(&self) -> CryptoResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.identity.is_none() {
            inner.identity = Some(IdentityKeyPair::generate());
            inner.registration_id = generate_registration_id();
        }
        Ok(())
    }

    async fn identity_public(&self) -> CryptoResult<PublicKeyBytes> {
        let inner = self.inner.lock().await;
        inner.identity.as_ref().map(|id| id.public).ok_or(CryptoError::NoIdentity)
    }

    async fn rotate_signed_prekey(&self) -> CryptoResult<SignedPreKeyPublic> {
        let mut inner = self.inner.lock().await;
        let identity = inner.identity.as_ref().ok_or(CryptoError::NoIdentity)?;
        let next_id = inner.signed_prekeys.keys().copied().max().unwrap_or(0) + 1;
        let spk = SignedPreKey::generate(next_id, identity, 0);
        let public = SignedPreKeyPublic { id: spk.id, public: *spk.public.as_bytes(), signature: spk.signature };
        inner.signed_prekeys.insert(spk.id, spk);
        inner.current_signed_prekey_id = Some(next_id);
        Ok(public)
    }

    async fn current_signed_prekey(&self) -> CryptoResult<SignedPreKeyPublic> {
        let inner = self.inner.lock().await;
        let id = inner.current_signed_prekey_id.ok_or(CryptoError::NoIdentity)?;
        let spk = inner.signed_prekeys.get(&id).expect("current id always present in map");
        Ok(SignedPreKeyPublic { id: spk.id, public: *spk.public.as_bytes(), signature: spk.signature })
    }

    async fn generate_prekeys(&self, start_id: u32, n: u32) -> CryptoResult<Vec<PreKeyPublic>> {
        let mut inner = self.inner.lock().await;
        let keys = generate_one_time_prekeys(start_id, n);
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(PreKeyPublic { id: key.id, public: *key.public.as_bytes() });
            inner.one_time_prekeys.insert(key.id, key);
        }
        inner.next_one_time_id = inner.next_one_time_id.max(start_id + n);
        Ok(out)
    }

    async fn consume_prekey(&self, id: u32) -> CryptoResult<Option<PreKeyPublic>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.one_time_prekeys.remove(&id).map(|k| PreKeyPublic { id: k.id, public: *k.public.as_bytes() }))
    }

    async fn count_prekeys(&self) -> CryptoResult<usize> {
        Ok(self.inner.lock().await.one_time_prekeys.len())
    }

    async fn load_session(&self, peer_id: &str) -> CryptoResult<Option<RatchetState>> {
        Ok(self.inner.lock().await.sessions.get(peer_id).cloned())
    }

    async fn store_session(&self, peer_id: &str, state: &RatchetState) -> CryptoResult<()> {
        self.inner.lock().await.sessions.insert(peer_id.to_string(), state.clone());
        Ok(())
    }

    async fn delete_session(&self, peer_id: &str) -> CryptoResult<()> {
        self.inner.lock().await.sessions.remove(peer_id);
        Ok(())
    }

    async fn load_own_sender_keys(&self) -> CryptoResult<HashMap<String, OwnSenderKey>> {
        Ok(self.inner.lock().await.own_sender_keys.clone())
    }

    async fn store_own_sender_keys(&self, keys: &HashMap<String, OwnSenderKey>) -> CryptoResult<()> {
        self.inner.lock().await.own_sender_keys = keys.clone();
        Ok(())
    }

    async fn clear_all(&self) -> CryptoResult<()> {
        *self.inner.lock().await = Inner::default();
        Ok(())
    }

    async fn initiate_x3dh(&self, bundle: &PreKeyBundle) -> CryptoResult<X3dhResult> {
        let inner = self.inner.lock().await;
        let identity = inner.identity.as_ref().ok_or(CryptoError::NoIdentity)?;
        x3dh::initiate(identity, bundle)
    }

    async fn respond_x3dh(
        &self,
        peer_identity_pub: &PublicKeyBytes,
        peer_ephemeral_public: &X25519Public,
        one_time_prekey_id: Option<u32>,
    ) -> CryptoResult<RatchetState> {
        let mut inner = self.inner.lock().await;
        let spk_id = inner.current_signed_prekey_id.ok_or(CryptoError::NoIdentity)?;
        let spk_secret: StaticSecret = inner.signed_prekeys.get(&spk_id).expect("current id always present").secret();
        let otk_secret = one_time_prekey_id.and_then(|id| inner.one_time_prekeys.remove(&id)).map(|k| k.secret());

        let identity = inner.identity.as_ref().ok_or(CryptoError::NoIdentity)?;
        let master_secret =
            x3dh::respond(identity, &spk_secret, otk_secret.as_ref(), peer_identity_pub, peer_ephemeral_public)?;
        Ok(RatchetState::init_as_responder(master_secret, &spk_secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_identity_then_handshake_round_trips() {
        let alice = MemoryKeyStore::new();
        let bob = MemoryKeyStore::new();
        alice.ensure_identity().await.unwrap();
        bob.ensure_identity().await.unwrap();

        let bob_spk = bob.rotate_signed_prekey().await.unwrap();
        let bob_otk = bob.generate_prekeys(1, 1).await.unwrap();
        let bob_identity = bob.identity_public().await.unwrap();

        let bundle = PreKeyBundle {
            peer_id: "bob".into(),
            registration_id: 1,
            identity_public: bob_identity,
            signed_prekey_id: bob_spk.id,
            signed_prekey_public: bob_spk.public,
            signed_prekey_signature: bob_spk.signature,
            one_time_prekey_id: Some(bob_otk[0].id),
            one_time_prekey_public: Some(bob_otk[0].public),
        };

        let handshake = alice.initiate_x3dh(&bundle).await.unwrap();
        let alice_identity = alice.identity_public().await.unwrap();
        let mut bob_ratchet = bob
            .respond_x3dh(&alice_identity, &handshake.ephemeral_public, handshake.used_one_time_id)
            .await
            .unwrap();
        let mut alice_ratchet = RatchetState::init_as_initiator(&handshake.master_secret, &bob_spk.public).unwrap();

        let config = kuurier_crypto::config::Config::default();
        let envelope = alice_ratchet.encrypt_message(b"hi").unwrap();
        assert_eq!(bob_ratchet.decrypt_message(&envelope, &config, 0).unwrap(), b"hi");
        assert_eq!(bob.count_prekeys().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn consume_prekey_is_one_shot() {
        let store = MemoryKeyStore::new();
        store.ensure_identity().await.unwrap();
        let keys = store.generate_prekeys(1, 1).await.unwrap();
        assert!(store.consume_prekey(keys[0].id).await.unwrap().is_some());
        assert!(store.consume_prekey(keys[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_all_resets_everything() {
        let store = MemoryKeyStore::new();
        store.ensure_identity().await.unwrap();
        store.generate_prekeys(1, 3).await.unwrap();
        store.clear_all().await.unwrap();
        assert!(store.identity_public().await.is_err());
        assert_eq!(store.count_prekeys().await.unwrap(), 0);
    }
}
