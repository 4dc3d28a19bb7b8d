//! C4 — Double Ratchet per-peer session state.
//!
//! References: Signal's Double Ratchet spec
//! <https://signal.org/docs/specifications/doubleratchet/>.
//!
//! `decrypt_message` builds its result on a clone of the current state and
//! only commits it back on success. This is what gives scenario 4 (a
//! header claiming an impossibly large skip) its "no state mutation on
//! failure" guarantee without needing a separate rollback log.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::codec::{self, RatchetHeader};
use crate::config::Config;
use crate::error::{CryptoError, Result};
use crate::primitives;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SkippedEntry {
    message_key: [u8; 32],
    timestamp: u64,
}

fn skipped_key_id(peer_ratchet_pub: &[u8; 32], message_number: u32) -> String {
    format!("{}:{message_number}", hex::encode(peer_ratchet_pub))
}

/// Per-peer Double Ratchet session state (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatchetState {
    root_key: [u8; 32],
    own_ratchet_secret: [u8; 32],
    own_ratchet_pub: [u8; 32],
    peer_ratchet_pub: Option<[u8; 32]>,
    send_chain_key: Option<[u8; 32]>,
    pub send_counter: u32,
    pub prev_send_chain_length: u32,
    recv_chain_key: Option<[u8; 32]>,
    pub recv_counter: u32,
    skipped_keys: HashMap<String, SkippedEntry>,
    pub has_received_first_message: bool,
}

impl Drop for RatchetState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.own_ratchet_secret.zeroize();
        if let Some(ref mut k) = self.send_chain_key {
            k.zeroize();
        }
        if let Some(ref mut k) = self.recv_chain_key {
            k.zeroize();
        }
        for entry in self.skipped_keys.values_mut() {
            entry.message_key.zeroize();
        }
    }
}

/// `(root_key, chain_key) = HKDF(salt=root, ikm=dh_output, info=...)` with
/// distinct info labels, per §4.4.
fn kdf_rk(root: &[u8; 32], dh_output: &[u8; 32]) -> Result<([u8; 32], [u8; 32])> {
    let new_root = primitives::hkdf_sha256_32(dh_output, Some(root), b"RootKey")?;
    let chain_key = primitives::hkdf_sha256_32(dh_output, Some(root), b"ChainKey")?;
    Ok((new_root, chain_key))
}

/// `(next_chain_key, message_key) = (HMAC(ck, 0x02), HMAC(ck, 0x01))`.
fn kdf_ck(chain_key: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let next_chain_key = primitives::hmac_sha256(chain_key, &[0x02]);
    let message_key = primitives::hmac_sha256(chain_key, &[0x01]);
    (next_chain_key, message_key)
}

fn derive_enc_key_and_nonce(message_key: &[u8; 32]) -> Result<([u8; 32], [u8; 12])> {
    let enc_key = primitives::hkdf_sha256_32(message_key, None, b"Enc")?;
    let mut nonce = [0u8; 12];
    primitives::hkdf_sha256(message_key, None, b"Nonce", &mut nonce)?;
    Ok((enc_key, nonce))
}

impl RatchetState {
    /// Initialize as the X3DH initiator. Generates the first own ratchet
    /// key pair and performs one DH ratchet step against the peer's
    /// signed pre-key, establishing a sending chain only.
    pub fn init_as_initiator(master_secret: &[u8; 32], peer_signed_prekey_public: &[u8; 32]) -> Result<Self> {
        let (own_secret, own_public) = primitives::x25519_keypair();
        let peer_pub = X25519Public::from(*peer_signed_prekey_public);
        let dh = primitives::x25519_agree(&own_secret, &peer_pub)?;
        let (root_key, send_chain_key) = kdf_rk(master_secret, &dh)?;

        Ok(Self {
            root_key,
            own_ratchet_secret: own_secret.to_bytes(),
            own_ratchet_pub: *own_public.as_bytes(),
            peer_ratchet_pub: Some(*peer_signed_prekey_public),
            send_chain_key: Some(send_chain_key),
            send_counter: 0,
            prev_send_chain_length: 0,
            recv_chain_key: None,
            recv_counter: 0,
            skipped_keys: HashMap::new(),
            has_received_first_message: false,
        })
    }

    /// Initialize as the X3DH responder. No chains exist yet; both are
    /// established on first send or on the DH ratchet triggered by the
    /// initiator's first inbound message.
    pub fn init_as_responder(master_secret: [u8; 32], own_signed_prekey_secret: &StaticSecret) -> Self {
        let own_public = X25519Public::from(own_signed_prekey_secret);
        Self {
            root_key: master_secret,
            own_ratchet_secret: own_signed_prekey_secret.to_bytes(),
            own_ratchet_pub: *own_public.as_bytes(),
            peer_ratchet_pub: None,
            send_chain_key: None,
            send_counter: 0,
            prev_send_chain_length: 0,
            recv_chain_key: None,
            recv_counter: 0,
            skipped_keys: HashMap::new(),
            has_received_first_message: false,
        }
    }

    pub fn own_ratchet_public(&self) -> [u8; 32] {
        self.own_ratchet_pub
    }

    pub fn peer_ratchet_public(&self) -> Option<[u8; 32]> {
        self.peer_ratchet_pub
    }

    pub fn skipped_key_count(&self) -> usize {
        self.skipped_keys.len()
    }

    /// Encrypt `plaintext`, returning a self-describing envelope (header +
    /// AES-256-GCM combined ciphertext).
    #[tracing::instrument(skip_all)]
    pub fn encrypt_message(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let chain_key = self.send_chain_key.ok_or(CryptoError::NoSendingChain)?;
        let (new_chain_key, message_key) = kdf_ck(&chain_key);
        self.send_chain_key = Some(new_chain_key);

        let header = RatchetHeader {
            ratchet_pub: self.own_ratchet_pub,
            prev_chain_length: self.prev_send_chain_length,
            message_number: self.send_counter,
        };
        self.send_counter += 1;

        let header_bytes = header.encode();
        let (enc_key, nonce) = derive_enc_key_and_nonce(&message_key)?;
        let combined = primitives::aes256_gcm_seal(&enc_key, &nonce, &header_bytes, plaintext)?;
        Ok(codec::encode_ratchet_envelope(&header_bytes, &combined))
    }

    /// Decrypt an envelope produced by `encrypt_message`. On any failure
    /// (including a rejected skip bound), `self` is left completely
    /// unmodified.
    #[tracing::instrument(skip_all)]
    pub fn decrypt_message(&mut self, envelope: &[u8], cfg: &Config, now_unix: u64) -> Result<Vec<u8>> {
        let (header, header_bytes, combined) = codec::decode_ratchet_envelope(envelope)?;

        if let Some(entry) = self.skipped_keys.get(&skipped_key_id(&header.ratchet_pub, header.message_number)) {
            let (enc_key, nonce) = derive_enc_key_and_nonce(&entry.message_key)?;
            let plaintext = primitives::aes256_gcm_open(&enc_key, &nonce, header_bytes, combined)?;
            self.skipped_keys.remove(&skipped_key_id(&header.ratchet_pub, header.message_number));
            return Ok(plaintext);
        }

        let mut work = self.clone();

        let need_dh_ratchet = match work.peer_ratchet_pub {
            Some(current) => current != header.ratchet_pub,
            None => true,
        };

        if need_dh_ratchet {
            if let Some(old_peer_pub) = work.peer_ratchet_pub {
                work.skip_chain(old_peer_pub, header.prev_chain_length, cfg, now_unix)?;
            }
            work.dh_ratchet_step(header.ratchet_pub)?;
        }

        if header.message_number < work.recv_counter {
            return Err(CryptoError::MessageAlreadyDecrypted);
        }

        let current_peer_pub = work.peer_ratchet_pub.expect("set by dh_ratchet_step or pre-existing epoch");
        work.skip_chain(current_peer_pub, header.message_number, cfg, now_unix)?;

        let chain_key = work.recv_chain_key.ok_or(CryptoError::NoReceivingChain)?;
        let (new_chain_key, message_key) = kdf_ck(&chain_key);
        work.recv_chain_key = Some(new_chain_key);
        work.recv_counter += 1;

        let (enc_key, nonce) = derive_enc_key_and_nonce(&message_key)?;
        let plaintext = primitives::aes256_gcm_open(&enc_key, &nonce, header_bytes, combined)?;

        work.has_received_first_message = true;
        *self = work;
        Ok(plaintext)
    }

    /// Advance the receive chain keyed by `peer_pub` from `recv_counter`
    /// up to (not including) `until`, caching each derived key as a
    /// skipped entry. A no-op if `until <= recv_counter`.
    fn skip_chain(&mut self, peer_pub: [u8; 32], until: u32, cfg: &Config, now_unix: u64) -> Result<()> {
        let start = self.recv_counter;
        if until <= start {
            return Ok(());
        }
        let distance = until - start;
        if distance > cfg.max_skip {
            return Err(CryptoError::TooManySkippedMessages);
        }
        let mut chain_key = self.recv_chain_key.ok_or(CryptoError::InvalidHeader)?;
        for i in start..until {
            let (next_chain_key, message_key) = kdf_ck(&chain_key);
            self.skipped_keys.insert(skipped_key_id(&peer_pub, i), SkippedEntry { message_key, timestamp: now_unix });
            chain_key = next_chain_key;
        }
        self.recv_chain_key = Some(chain_key);
        self.recv_counter = until;
        self.evict_skipped_keys(cfg, now_unix);
        Ok(())
    }

    /// Two-pass DoS-resistant eviction: age first, then capacity.
    fn evict_skipped_keys(&mut self, cfg: &Config, now_unix: u64) {
        self.skipped_keys.retain(|_, entry| now_unix.saturating_sub(entry.timestamp) <= cfg.max_skipped_age_seconds);

        if self.skipped_keys.len() > cfg.max_skipped {
            let mut by_age: Vec<(String, u64)> =
                self.skipped_keys.iter().map(|(k, v)| (k.clone(), v.timestamp)).collect();
            by_age.sort_by_key(|(_, ts)| *ts);
            let excess = self.skipped_keys.len() - cfg.max_skipped;
            for (key, _) in by_age.into_iter().take(excess) {
                self.skipped_keys.remove(&key);
            }
        }
    }

    fn dh_ratchet_step(&mut self, peer_pub: [u8; 32]) -> Result<()> {
        let peer_pub_x = X25519Public::from(peer_pub);
        let own_secret = StaticSecret::from(self.own_ratchet_secret);

        let dh_recv = primitives::x25519_agree(&own_secret, &peer_pub_x)?;
        let (root_after_recv, recv_chain_key) = kdf_rk(&self.root_key, &dh_recv)?;

        self.peer_ratchet_pub = Some(peer_pub);
        self.prev_send_chain_length = self.send_counter;
        self.send_counter = 0;
        self.recv_counter = 0;
        self.root_key = root_after_recv;
        self.recv_chain_key = Some(recv_chain_key);

        let (new_own_secret, new_own_public) = primitives::x25519_keypair();
        let dh_send = primitives::x25519_agree(&new_own_secret, &peer_pub_x)?;
        let (root_after_send, send_chain_key) = kdf_rk(&self.root_key, &dh_send)?;

        self.root_key = root_after_send;
        self.send_chain_key = Some(send_chain_key);
        self.own_ratchet_secret = new_own_secret.to_bytes();
        self.own_ratchet_pub = *new_own_public.as_bytes();

        Ok(())
    }
}
