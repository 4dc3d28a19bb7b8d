//! Orchestration layer binding C3/C4/C5 to a `KeyStore` and `Directory`
//! (spec §2 control flow, §5 concurrency model).
//!
//! Two lock layers. The outer maps (which peer/channel slots exist) are
//! guarded by a plain `parking_lot::Mutex` — lookup and insertion never
//! await, so a synchronous lock is the right tool and never blocks the
//! executor. The slot itself is a `tokio::sync::Mutex`, held across the
//! handshake and persistence awaits in `encrypt_to_peer`/
//! `decrypt_from_peer`, not just the in-memory ratchet step, so two
//! concurrent calls for the same never-before-contacted peer cannot both
//! observe an empty slot and both run X3DH — the second call blocks
//! until the first has installed the session. Lock acquisition order is
//! always channel-sender-key before the 1:1 session locks it needs for
//! distribution — never the reverse — which is what rules out deadlock
//! by construction. Identity and pre-key secrets never surface here:
//! `KeyStore::initiate_x3dh` hands back only the derived master secret
//! and ephemeral public; `KeyStore::respond_x3dh` hands back a
//! fully-formed `RatchetState` so the signed pre-key's raw secret never
//! crosses the trait boundary either.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use x25519_dalek::PublicKey as X25519Public;

use crate::codec::{self, X3dhHeader};
use crate::config::Config;
use crate::error::{CryptoError, Result};
use crate::identity::{PreKeyBundle, PublicKeyBytes};
use crate::keystore::{Directory, DirectoryBundle, KeyStore};
use crate::ratchet::RatchetState;
use crate::sender_key::{OwnSenderKey, PeerSenderKey};
use crate::traits::Clock;

fn bundle_from_directory(peer_id: &str, directory: DirectoryBundle) -> PreKeyBundle {
    PreKeyBundle {
        peer_id: peer_id.to_string(),
        registration_id: directory.registration_id,
        identity_public: directory.identity_public,
        signed_prekey_id: directory.signed_prekey.id,
        signed_prekey_public: directory.signed_prekey.public,
        signed_prekey_signature: directory.signed_prekey.signature,
        one_time_prekey_id: directory.one_time_prekey.map(|k| k.id),
        one_time_prekey_public: directory.one_time_prekey.map(|k| k.public),
    }
}

type SessionSlot = Arc<Mutex<Option<RatchetState>>>;

/// Owns all live 1:1 and group session state for one account and
/// coordinates it with a `KeyStore` and a `Directory`.
pub struct SessionManager {
    store: Arc<dyn KeyStore>,
    directory: Arc<dyn Directory>,
    clock: Arc<dyn Clock>,
    config: Config,
    sessions: SyncMutex<HashMap<String, SessionSlot>>,
    own_sender_keys: SyncMutex<HashMap<String, Arc<Mutex<OwnSenderKey>>>>,
    peer_sender_keys: SyncMutex<HashMap<(String, String), Arc<Mutex<PeerSenderKey>>>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KeyStore>, directory: Arc<dyn Directory>, clock: Arc<dyn Clock>, config: Config) -> Self {
        Self {
            store,
            directory,
            clock,
            config,
            sessions: SyncMutex::new(HashMap::new()),
            own_sender_keys: SyncMutex::new(HashMap::new()),
            peer_sender_keys: SyncMutex::new(HashMap::new()),
        }
    }

    fn session_slot(&self, peer_id: &str) -> SessionSlot {
        self.sessions.lock().entry(peer_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(None))).clone()
    }

    /// Encrypt `plaintext` for `peer_id`, running X3DH first if no
    /// session is cached or persisted. Returns a handshake-wrapped
    /// envelope on the first message of a new session, a plain ratchet
    /// envelope otherwise.
    ///
    /// The slot lock is acquired once and held for the whole call, so a
    /// concurrent call for the same peer queues behind this one rather
    /// than racing it into a duplicate handshake or an interleaved
    /// ratchet step.
    #[tracing::instrument(skip(self, plaintext))]
    pub async fn encrypt_to_peer(&self, peer_id: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let slot = self.session_slot(peer_id);
        let mut guard = slot.lock().await;

        if guard.is_none() {
            if let Some(persisted) = self.store.load_session(peer_id).await? {
                *guard = Some(persisted);
            }
        }

        let handshake_header = if guard.is_none() {
            let bundle_dto = self.directory.fetch_bundle(peer_id).await.map_err(|_| CryptoError::DirectoryUnavailable)?;
            let bundle = bundle_from_directory(peer_id, bundle_dto);
            let handshake = self.store.initiate_x3dh(&bundle).await?;
            let state = RatchetState::init_as_initiator(&handshake.master_secret, &bundle.signed_prekey_public)?;
            *guard = Some(state);
            Some(X3dhHeader {
                ephemeral_public: *handshake.ephemeral_public.as_bytes(),
                one_time_prekey_id: handshake.used_one_time_id,
            })
        } else {
            None
        };

        let state = guard.as_mut().expect("populated above");
        let ratchet_envelope = state.encrypt_message(plaintext)?;
        self.store.store_session(peer_id, guard.as_ref().expect("populated above")).await?;

        Ok(match handshake_header {
            Some(header) => codec::encode_handshake_envelope(&header, &ratchet_envelope),
            None => ratchet_envelope,
        })
    }

    /// Decrypt an inbound 1:1 envelope from `peer_id`. `peer_identity_pub`
    /// is the directory-registered identity for `peer_id` and is compared
    /// against the handshake's claimed identity whenever a new session is
    /// bootstrapped; a mismatch is fatal and consumes no one-time
    /// pre-key. As with `encrypt_to_peer`, the slot lock is held for the
    /// whole call so concurrent decrypts for the same peer serialize.
    #[tracing::instrument(skip(self, envelope))]
    pub async fn decrypt_from_peer(&self, peer_id: &str, peer_identity_pub: &PublicKeyBytes, envelope: &[u8]) -> Result<Vec<u8>> {
        let slot = self.session_slot(peer_id);
        let mut guard = slot.lock().await;

        if guard.is_none() {
            if let Some(persisted) = self.store.load_session(peer_id).await? {
                *guard = Some(persisted);
            }
        }

        let ratchet_envelope = if guard.is_none() {
            let (header, inner) = codec::decode_handshake_envelope(envelope)?;
            let registered = self.directory.fetch_bundle(peer_id).await.map_err(|_| CryptoError::DirectoryUnavailable)?;
            if !registered.identity_public.fingerprints_match(peer_identity_pub) {
                return Err(CryptoError::IdentityKeyMismatch);
            }

            let ephemeral = X25519Public::from(header.ephemeral_public);
            let state = self.store.respond_x3dh(peer_identity_pub, &ephemeral, header.one_time_prekey_id).await?;
            *guard = Some(state);
            inner.to_vec()
        } else {
            envelope.to_vec()
        };

        let state = guard.as_mut().expect("populated above");
        let plaintext = state.decrypt_message(&ratchet_envelope, &self.config, self.clock.now_unix())?;
        self.store.store_session(peer_id, guard.as_ref().expect("populated above")).await?;
        Ok(plaintext)
    }

    fn sender_key_slot(&self, channel_id: &str) -> Option<Arc<Mutex<OwnSenderKey>>> {
        self.own_sender_keys.lock().get(channel_id).cloned()
    }

    fn insert_sender_key_slot(&self, channel_id: &str, key: OwnSenderKey) -> Arc<Mutex<OwnSenderKey>> {
        let slot = Arc::new(Mutex::new(key));
        self.own_sender_keys.lock().insert(channel_id.to_string(), slot.clone());
        slot
    }

    /// Return the cached slot for `channel_id`, or seed one from the
    /// persisted store, or generate a fresh key if none exists anywhere.
    /// The returned bool is whether the key was freshly generated (and so
    /// still needs distributing) rather than loaded from the in-memory
    /// cache or the store.
    async fn hydrate_or_create_sender_key(&self, channel_id: &str) -> Result<(Arc<Mutex<OwnSenderKey>>, bool)> {
        if let Some(slot) = self.sender_key_slot(channel_id) {
            return Ok((slot, false));
        }
        let persisted = self.store.load_own_sender_keys().await?.remove(channel_id);
        let is_new = persisted.is_none();
        let key = persisted.unwrap_or_else(OwnSenderKey::generate);
        Ok((self.insert_sender_key_slot(channel_id, key), is_new))
    }

    fn peer_sender_key_slot(&self, channel_id: &str, sender_id: &str) -> Option<Arc<Mutex<PeerSenderKey>>> {
        self.peer_sender_keys.lock().get(&(channel_id.to_string(), sender_id.to_string())).cloned()
    }

    /// Discard the previous own sender key and every cached peer sender
    /// key for `channel_id`, then create and distribute a fresh one.
    /// Callers invoke this on any observed membership change (spec §4.5).
    #[tracing::instrument(skip(self))]
    pub async fn rotate_channel_sender_key(&self, channel_id: &str) -> Result<()> {
        self.own_sender_keys.lock().remove(channel_id);
        self.peer_sender_keys.lock().retain(|(c, _), _| c != channel_id);

        let key = OwnSenderKey::generate();
        let mut persisted = self.store.load_own_sender_keys().await?;
        persisted.insert(channel_id.to_string(), key.clone());
        self.store.store_own_sender_keys(&persisted).await?;

        let slot = self.insert_sender_key_slot(channel_id, key);
        self.distribute_channel_sender_key(channel_id, &slot).await
    }

    /// `distribute` (spec §4.5): wraps a fresh distribution message for
    /// every member who has a usable 1:1 session, skipping the rest —
    /// they pick it up later via the directory on cache miss.
    async fn distribute_channel_sender_key(&self, channel_id: &str, slot: &Arc<Mutex<OwnSenderKey>>) -> Result<()> {
        let (distribution_bytes, distribution_id) = {
            let own = slot.lock().await;
            (own.to_distribution_bytes(), own.distribution_id)
        };

        let members = self.directory.channel_members(channel_id).await.map_err(|_| CryptoError::DirectoryUnavailable)?;
        let mut recipients = Vec::new();
        for member in members {
            if let Ok(ciphertext) = self.encrypt_to_peer(&member, &distribution_bytes).await {
                recipients.push((member, ciphertext));
            }
        }

        self.directory
            .publish_encrypted_sender_key(channel_id, distribution_id, recipients)
            .await
            .map_err(|_| CryptoError::DirectoryUnavailable)
    }

    /// Encrypt `plaintext` for every current member of `channel_id`,
    /// creating and distributing the channel's own sender key on first
    /// use.
    #[tracing::instrument(skip(self, plaintext))]
    pub async fn encrypt_to_channel(&self, channel_id: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let (slot, is_new) = self.hydrate_or_create_sender_key(channel_id).await?;
        if is_new {
            self.distribute_channel_sender_key(channel_id, &slot).await?;
        }
        let (envelope, snapshot) = {
            let mut own = slot.lock().await;
            let envelope = own.encrypt(plaintext)?;
            (envelope, own.clone())
        };

        let mut map = self.store.load_own_sender_keys().await?;
        map.insert(channel_id.to_string(), snapshot);
        self.store.store_own_sender_keys(&map).await?;

        Ok(envelope)
    }

    /// Decrypt a group envelope from `sender_id` on `channel_id`,
    /// fetching and decrypting the sender's distribution message via the
    /// directory and a 1:1 session on a cache miss.
    #[tracing::instrument(skip(self, envelope))]
    pub async fn decrypt_from_channel(
        &self,
        channel_id: &str,
        sender_id: &str,
        sender_identity_pub: &PublicKeyBytes,
        envelope: &[u8],
    ) -> Result<Vec<u8>> {
        let slot = match self.peer_sender_key_slot(channel_id, sender_id) {
            Some(slot) => slot,
            None => self.fetch_and_cache_peer_sender_key(channel_id, sender_id, sender_identity_pub).await?,
        };
        let result = slot.lock().await.decrypt(envelope, &self.config);
        result
    }

    async fn fetch_and_cache_peer_sender_key(
        &self,
        channel_id: &str,
        sender_id: &str,
        sender_identity_pub: &PublicKeyBytes,
    ) -> Result<Arc<Mutex<PeerSenderKey>>> {
        let entries = self.directory.fetch_encrypted_sender_keys(channel_id).await.map_err(|_| CryptoError::DirectoryUnavailable)?;
        let entry = entries.into_iter().find(|e| e.sender_id == sender_id).ok_or(CryptoError::SenderKeyNotFound)?;

        let plaintext = self.decrypt_from_peer(sender_id, sender_identity_pub, &entry.ciphertext).await?;
        let peer_key = OwnSenderKey::from_distribution_bytes(&plaintext)?;

        let slot = Arc::new(Mutex::new(peer_key));
        self.peer_sender_keys.lock().insert((channel_id.to_string(), sender_id.to_string()), slot.clone());
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{generate_registration_id, IdentityKeyPair, OneTimePreKey, SignedPreKey};
    use crate::keystore::{EncryptedSenderKeyEntry, PreKeyPublic, SignedPreKeyPublic};
    use crate::traits::FixedClock;
    use crate::x3dh;

    /// Single-account in-memory `KeyStore`, good enough to drive
    /// `SessionManager` end to end without a database.
    struct TestStore {
        identity: IdentityKeyPair,
        registration_id: u16,
        signed_prekeys: SyncMutex<HashMap<u32, SignedPreKey>>,
        current_signed_prekey_id: SyncMutex<u32>,
        one_time_prekeys: SyncMutex<HashMap<u32, OneTimePreKey>>,
        sessions: SyncMutex<HashMap<String, RatchetState>>,
        own_sender_keys: SyncMutex<HashMap<String, OwnSenderKey>>,
    }

    impl TestStore {
        fn new() -> Arc<Self> {
            let identity = IdentityKeyPair::generate();
            let spk = SignedPreKey::generate(1, &identity, 0);
            let mut signed_prekeys = HashMap::new();
            signed_prekeys.insert(1, spk);
            Arc::new(Self {
                identity,
                registration_id: generate_registration_id(),
                signed_prekeys: SyncMutex::new(signed_prekeys),
                current_signed_prekey_id: SyncMutex::new(1),
                one_time_prekeys: SyncMutex::new(HashMap::new()),
                sessions: SyncMutex::new(HashMap::new()),
                own_sender_keys: SyncMutex::new(HashMap::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl KeyStore for TestStore {
        async fn ensure_identity(&self) -> Result<()> {
            Ok(())
        }

        async fn identity_public(&self) -> Result<PublicKeyBytes> {
            Ok(self.identity.public)
        }

        async fn rotate_signed_prekey(&self) -> Result<SignedPreKeyPublic> {
            let mut current = self.current_signed_prekey_id.lock();
            let next_id = *current + 1;
            let spk = SignedPreKey::generate(next_id, &self.identity, 0);
            let public = SignedPreKeyPublic { id: spk.id, public: *spk.public.as_bytes(), signature: spk.signature };
            self.signed_prekeys.lock().insert(next_id, spk);
            *current = next_id;
            Ok(public)
        }

        async fn current_signed_prekey(&self) -> Result<SignedPreKeyPublic> {
            let id = *self.current_signed_prekey_id.lock();
            let prekeys = self.signed_prekeys.lock();
            let spk = prekeys.get(&id).expect("current signed prekey always present");
            Ok(SignedPreKeyPublic { id: spk.id, public: *spk.public.as_bytes(), signature: spk.signature })
        }

        async fn generate_prekeys(&self, start_id: u32, n: u32) -> Result<Vec<PreKeyPublic>> {
            let mut otks = self.one_time_prekeys.lock();
            let mut out = Vec::with_capacity(n as usize);
            for i in 0..n {
                let otk = OneTimePreKey::generate(start_id + i);
                out.push(PreKeyPublic { id: otk.id, public: *otk.public.as_bytes() });
                otks.insert(otk.id, otk);
            }
            Ok(out)
        }

        async fn consume_prekey(&self, id: u32) -> Result<Option<PreKeyPublic>> {
            Ok(self.one_time_prekeys.lock().remove(&id).map(|otk| PreKeyPublic { id: otk.id, public: *otk.public.as_bytes() }))
        }

        async fn count_prekeys(&self) -> Result<usize> {
            Ok(self.one_time_prekeys.lock().len())
        }

        async fn load_session(&self, peer_id: &str) -> Result<Option<RatchetState>> {
            Ok(self.sessions.lock().get(peer_id).cloned())
        }

        async fn store_session(&self, peer_id: &str, state: &RatchetState) -> Result<()> {
            self.sessions.lock().insert(peer_id.to_string(), state.clone());
            Ok(())
        }

        async fn delete_session(&self, peer_id: &str) -> Result<()> {
            self.sessions.lock().remove(peer_id);
            Ok(())
        }

        async fn load_own_sender_keys(&self) -> Result<HashMap<String, OwnSenderKey>> {
            Ok(self.own_sender_keys.lock().clone())
        }

        async fn store_own_sender_keys(&self, keys: &HashMap<String, OwnSenderKey>) -> Result<()> {
            *self.own_sender_keys.lock() = keys.clone();
            Ok(())
        }

        async fn clear_all(&self) -> Result<()> {
            self.signed_prekeys.lock().clear();
            self.one_time_prekeys.lock().clear();
            self.sessions.lock().clear();
            self.own_sender_keys.lock().clear();
            Ok(())
        }

        async fn initiate_x3dh(&self, bundle: &PreKeyBundle) -> Result<x3dh::X3dhResult> {
            x3dh::initiate(&self.identity, bundle)
        }

        async fn respond_x3dh(
            &self,
            peer_identity_pub: &PublicKeyBytes,
            peer_ephemeral_public: &X25519Public,
            one_time_prekey_id: Option<u32>,
        ) -> Result<RatchetState> {
            let id = *self.current_signed_prekey_id.lock();
            let spk_secret = self.signed_prekeys.lock().get(&id).expect("current signed prekey always present").secret();
            let otk_secret = match one_time_prekey_id {
                Some(otk_id) => Some(self.one_time_prekeys.lock().remove(&otk_id).ok_or(CryptoError::StorageUnavailable)?.secret()),
                None => None,
            };
            let master_secret = x3dh::respond(
                &self.identity,
                &spk_secret,
                otk_secret.as_ref(),
                peer_identity_pub,
                peer_ephemeral_public,
            )?;
            Ok(RatchetState::init_as_responder(master_secret, &spk_secret))
        }
    }

    /// Shared directory the test accounts publish to and fetch from.
    struct TestDirectory {
        bundles: SyncMutex<HashMap<String, DirectoryBundle>>,
        channel_members: SyncMutex<HashMap<String, Vec<String>>>,
        sender_keys: SyncMutex<HashMap<String, Vec<EncryptedSenderKeyEntry>>>,
    }

    impl TestDirectory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                bundles: SyncMutex::new(HashMap::new()),
                channel_members: SyncMutex::new(HashMap::new()),
                sender_keys: SyncMutex::new(HashMap::new()),
            })
        }

        fn register(&self, peer_id: &str, store: &Arc<TestStore>) {
            let spk = {
                let prekeys = store.signed_prekeys.lock();
                let spk = prekeys.get(&1).unwrap();
                SignedPreKeyPublic { id: spk.id, public: *spk.public.as_bytes(), signature: spk.signature }
            };
            let bundle = DirectoryBundle {
                identity_public: store.identity.public,
                registration_id: store.registration_id,
                signed_prekey: spk,
                one_time_prekey: None,
            };
            self.bundles.lock().insert(peer_id.to_string(), bundle);
        }

        fn set_channel_members(&self, channel_id: &str, members: Vec<String>) {
            self.channel_members.lock().insert(channel_id.to_string(), members);
        }
    }

    #[async_trait::async_trait]
    impl Directory for TestDirectory {
        async fn publish_identity_and_prekeys(
            &self,
            _identity_public: PublicKeyBytes,
            _registration_id: u16,
            _signed_prekey: SignedPreKeyPublic,
            _one_time_prekeys: Vec<PreKeyPublic>,
        ) -> Result<()> {
            Ok(())
        }

        async fn publish_one_time_prekeys(&self, _prekeys: Vec<PreKeyPublic>) -> Result<()> {
            Ok(())
        }

        async fn rotate_signed_prekey(&self, _signed_prekey: SignedPreKeyPublic) -> Result<()> {
            Ok(())
        }

        async fn fetch_bundle(&self, peer_id: &str) -> Result<DirectoryBundle> {
            self.bundles.lock().get(peer_id).cloned().ok_or(CryptoError::DirectoryUnavailable)
        }

        async fn publish_encrypted_sender_key(
            &self,
            channel_id: &str,
            distribution_id: [u8; 16],
            recipients: Vec<(String, Vec<u8>)>,
        ) -> Result<()> {
            let entries = recipients
                .into_iter()
                .map(|(sender_id, ciphertext)| EncryptedSenderKeyEntry { sender_id, distribution_id, ciphertext })
                .collect();
            self.sender_keys.lock().insert(channel_id.to_string(), entries);
            Ok(())
        }

        async fn fetch_encrypted_sender_keys(&self, channel_id: &str) -> Result<Vec<EncryptedSenderKeyEntry>> {
            Ok(self.sender_keys.lock().get(channel_id).cloned().unwrap_or_default())
        }

        async fn channel_members(&self, channel_id: &str) -> Result<Vec<String>> {
            Ok(self.channel_members.lock().get(channel_id).cloned().unwrap_or_default())
        }

        async fn prekey_count(&self) -> Result<(usize, bool)> {
            Ok((0, false))
        }
    }

    fn manager_for(peer_id: &str, directory: &Arc<TestDirectory>) -> (SessionManager, Arc<TestStore>) {
        let store = TestStore::new();
        directory.register(peer_id, &store);
        let manager = SessionManager::new(store.clone(), directory.clone(), Arc::new(FixedClock::new(1_000)), Config::default());
        (manager, store)
    }

    #[tokio::test]
    async fn one_to_one_round_trip_and_reply_use_same_session() {
        let directory = TestDirectory::new();
        let (alice, _) = manager_for("alice", &directory);
        let (bob, _) = manager_for("bob", &directory);
        let alice_identity = alice.store.identity_public().await.unwrap();
        let bob_identity = bob.store.identity_public().await.unwrap();

        let envelope = alice.encrypt_to_peer("bob", b"hello bob").await.unwrap();
        let plaintext = bob.decrypt_from_peer("alice", &alice_identity, &envelope).await.unwrap();
        assert_eq!(plaintext, b"hello bob");

        // Bob's reply rides the now-established session, no handshake header.
        let reply = bob.encrypt_to_peer("alice", b"hi alice").await.unwrap();
        let plaintext = alice.decrypt_from_peer("bob", &bob_identity, &reply).await.unwrap();
        assert_eq!(plaintext, b"hi alice");
    }

    #[tokio::test]
    async fn decrypt_from_peer_rejects_identity_mismatch() {
        let directory = TestDirectory::new();
        let (alice, _) = manager_for("alice", &directory);
        let (bob, _) = manager_for("bob", &directory);
        let impostor_identity = IdentityKeyPair::generate().public;

        let envelope = alice.encrypt_to_peer("bob", b"hello bob").await.unwrap();
        let err = bob.decrypt_from_peer("alice", &impostor_identity, &envelope).await.unwrap_err();
        assert!(matches!(err, CryptoError::IdentityKeyMismatch));
    }

    #[tokio::test]
    async fn group_message_round_trips_to_every_member() {
        let directory = TestDirectory::new();
        let (alice, _) = manager_for("alice", &directory);
        let (bob, _) = manager_for("bob", &directory);
        let (carol, _) = manager_for("carol", &directory);
        let alice_identity = alice.store.identity_public().await.unwrap();

        directory.set_channel_members("room", vec!["bob".into(), "carol".into()]);

        let envelope = alice.encrypt_to_channel("room", b"gm room").await.unwrap();

        let bob_plaintext = bob.decrypt_from_channel("room", "alice", &alice_identity, &envelope).await.unwrap();
        assert_eq!(bob_plaintext, b"gm room");

        let carol_plaintext = carol.decrypt_from_channel("room", "alice", &alice_identity, &envelope).await.unwrap();
        assert_eq!(carol_plaintext, b"gm room");
    }

    #[tokio::test]
    async fn rotating_channel_sender_key_invalidates_cached_peer_key() {
        let directory = TestDirectory::new();
        let (alice, _) = manager_for("alice", &directory);
        let (bob, _) = manager_for("bob", &directory);
        let alice_identity = alice.store.identity_public().await.unwrap();
        directory.set_channel_members("room", vec!["bob".into()]);

        let first = alice.encrypt_to_channel("room", b"first").await.unwrap();
        bob.decrypt_from_channel("room", "alice", &alice_identity, &first).await.unwrap();

        alice.rotate_channel_sender_key("room").await.unwrap();
        let second = alice.encrypt_to_channel("room", b"second").await.unwrap();
        let plaintext = bob.decrypt_from_channel("room", "alice", &alice_identity, &second).await.unwrap();
        assert_eq!(plaintext, b"second");
    }
}
