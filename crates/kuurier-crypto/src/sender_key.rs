//! C5 — Sender-Key group encryption (spec §4.5).
//!
//! Many-recipient encryption without running one Double Ratchet operation
//! per member per message. Each sender derives message keys from a single
//! `chain_key` by varying the HKDF `info` label with the message iteration
//! rather than ratcheting the chain forward. That means compromising a
//! sender's `chain_key` decrypts every past and future group message from
//! that sender until the channel is rotated — there is no forward secrecy
//! within a sender's own chain. Group keys themselves are bootstrapped and
//! rotated over Double-Ratchet-protected 1:1 channels, so distribution
//! messages carry the usual forward secrecy; only the bulk group traffic
//! trades it away for the fan-out cost savings.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::config::Config;
use crate::error::{CryptoError, Result};
use crate::primitives;

/// This account's sender key for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnSenderKey {
    pub distribution_id: [u8; 16],
    pub chain_key: [u8; 32],
    pub iteration: u32,
}

impl OwnSenderKey {
    /// Fresh key: random distribution id and chain key, iteration zero.
    pub fn generate() -> Self {
        let mut distribution_id = [0u8; 16];
        let mut chain_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut distribution_id);
        rand::rngs::OsRng.fill_bytes(&mut chain_key);
        Self { distribution_id, chain_key, iteration: 0 }
    }

    /// Plaintext distribution payload handed to `DR_encrypt` for each
    /// current member (spec §4.5 "Distribution"). Not itself encrypted —
    /// the 1:1 ratchet session the caller wraps this in provides that.
    pub fn to_distribution_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 32 + 4);
        out.extend_from_slice(&self.distribution_id);
        out.extend_from_slice(&self.chain_key);
        out.extend_from_slice(&self.iteration.to_le_bytes());
        out
    }

    pub fn from_distribution_bytes(bytes: &[u8]) -> Result<PeerSenderKey> {
        if bytes.len() != 16 + 32 + 4 {
            return Err(CryptoError::InvalidMessage);
        }
        let mut distribution_id = [0u8; 16];
        distribution_id.copy_from_slice(&bytes[..16]);
        let mut chain_key = [0u8; 32];
        chain_key.copy_from_slice(&bytes[16..48]);
        let iteration = u32::from_le_bytes(bytes[48..52].try_into().unwrap());
        Ok(PeerSenderKey { distribution_id, chain_key, seen_iterations: Vec::new(), iteration_floor: iteration })
    }

    /// Derive the message key for the current iteration without advancing
    /// the chain, then advance the iteration counter.
    #[tracing::instrument(skip_all)]
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let message_key = derive_message_key(&self.chain_key, self.iteration)?;
        let mut nonce = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let mut combined = Vec::with_capacity(12 + plaintext.len() + 16);
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&primitives::aes256_gcm_seal(&message_key, &nonce, &[], plaintext)?);

        let envelope = codec::encode_group_envelope(&self.distribution_id, self.iteration, &combined);
        self.iteration += 1;
        Ok(envelope)
    }
}

/// A cached peer sender key, learned from a decrypted distribution
/// message. Tracks which iterations have already been consumed so a
/// replayed ciphertext cannot be decrypted twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSenderKey {
    pub distribution_id: [u8; 16],
    pub chain_key: [u8; 32],
    /// Ascending, deduplicated set of iterations already decrypted.
    seen_iterations: Vec<u32>,
    iteration_floor: u32,
}

impl PeerSenderKey {
    fn is_replay(&self, iteration: u32) -> bool {
        self.seen_iterations.binary_search(&iteration).is_ok()
    }

    fn record_and_prune(&mut self, iteration: u32, cfg: &Config) {
        if let Err(pos) = self.seen_iterations.binary_search(&iteration) {
            self.seen_iterations.insert(pos, iteration);
        }
        if self.seen_iterations.len() > cfg.group_replay_window {
            let drop_count = self.seen_iterations.len() - cfg.group_replay_retain_on_overflow;
            self.seen_iterations.drain(..drop_count);
        }
    }

    /// Decrypt one group envelope. `envelope` must match this cached
    /// key's `distribution_id` — callers that have not yet confirmed that
    /// (e.g. on the first message after a suspected rotation) should
    /// compare ids themselves and treat a mismatch as a refetch signal
    /// rather than calling this.
    #[tracing::instrument(skip_all)]
    pub fn decrypt(&mut self, envelope: &[u8], cfg: &Config) -> Result<Vec<u8>> {
        let (distribution_id, iteration, combined) = codec::decode_group_envelope(envelope)?;
        if distribution_id != self.distribution_id {
            return Err(CryptoError::InvalidDistributionId);
        }
        if self.is_replay(iteration) {
            return Err(CryptoError::ReplayDetected);
        }
        if combined.len() < 12 {
            return Err(CryptoError::InvalidMessage);
        }
        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce: [u8; 12] = nonce_bytes.try_into().unwrap();

        let message_key = derive_message_key(&self.chain_key, iteration)?;
        let plaintext = primitives::aes256_gcm_open(&message_key, &nonce, &[], ciphertext)?;

        self.record_and_prune(iteration, cfg);
        Ok(plaintext)
    }
}

/// `message_key = HKDF-SHA-256(IKM = chain_key, salt = 0, info =
/// "SenderKey-<iteration>")`, where `<iteration>` is the ASCII-decimal
/// iteration number. Deliberately non-ratcheting (see module docs).
fn derive_message_key(chain_key: &[u8; 32], iteration: u32) -> Result<[u8; 32]> {
    let info = format!("SenderKey-{iteration}");
    primitives::hkdf_sha256_32(chain_key, Some(&[0u8; 32]), info.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_round_trips() {
        let own = OwnSenderKey::generate();
        let bytes = own.to_distribution_bytes();
        let peer = OwnSenderKey::from_distribution_bytes(&bytes).unwrap();
        assert_eq!(peer.distribution_id, own.distribution_id);
        assert_eq!(peer.chain_key, own.chain_key);
        assert_eq!(peer.iteration_floor, own.iteration);
    }

    #[test]
    fn encrypt_decrypt_roundtrip_across_iterations() {
        let mut own = OwnSenderKey::generate();
        let mut peer = OwnSenderKey::from_distribution_bytes(&own.to_distribution_bytes()).unwrap();
        let cfg = Config::default();

        for i in 0..5u32 {
            let env = own.encrypt(format!("msg-{i}").as_bytes()).unwrap();
            let pt = peer.decrypt(&env, &cfg).unwrap();
            assert_eq!(pt, format!("msg-{i}").as_bytes());
        }
        assert_eq!(own.iteration, 5);
    }

    #[test]
    fn out_of_order_iterations_all_decrypt_once() {
        let mut own = OwnSenderKey::generate();
        let mut peer = OwnSenderKey::from_distribution_bytes(&own.to_distribution_bytes()).unwrap();
        let cfg = Config::default();

        let envs: Vec<Vec<u8>> = (0..3).map(|i| own.encrypt(format!("m{i}").as_bytes()).unwrap()).collect();
        assert_eq!(peer.decrypt(&envs[2], &cfg).unwrap(), b"m2");
        assert_eq!(peer.decrypt(&envs[0], &cfg).unwrap(), b"m0");
        assert_eq!(peer.decrypt(&envs[1], &cfg).unwrap(), b"m1");
    }

    #[test]
    fn replayed_iteration_is_rejected() {
        let mut own = OwnSenderKey::generate();
        let mut peer = OwnSenderKey::from_distribution_bytes(&own.to_distribution_bytes()).unwrap();
        let cfg = Config::default();

        let env = own.encrypt(b"once").unwrap();
        assert_eq!(peer.decrypt(&env, &cfg).unwrap(), b"once");
        let err = peer.decrypt(&env, &cfg).unwrap_err();
        assert!(matches!(err, CryptoError::ReplayDetected));
    }

    #[test]
    fn mismatched_distribution_id_is_rejected() {
        let mut own_a = OwnSenderKey::generate();
        let other = OwnSenderKey::generate();
        let mut peer_of_other = OwnSenderKey::from_distribution_bytes(&other.to_distribution_bytes()).unwrap();
        let cfg = Config::default();

        let env = own_a.encrypt(b"hi").unwrap();
        let err = peer_of_other.decrypt(&env, &cfg).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidDistributionId));
    }

    #[test]
    fn replay_window_prunes_to_retain_threshold_on_overflow() {
        let mut own = OwnSenderKey::generate();
        let mut peer = OwnSenderKey::from_distribution_bytes(&own.to_distribution_bytes()).unwrap();
        let mut cfg = Config::default();
        cfg.group_replay_window = 4;
        cfg.group_replay_retain_on_overflow = 2;

        for i in 0..6u32 {
            let env = own.encrypt(format!("m{i}").as_bytes()).unwrap();
            peer.decrypt(&env, &cfg).unwrap();
        }
        assert!(peer.seen_iterations.len() <= cfg.group_replay_retain_on_overflow + 1);
        // The most recent iteration must still be tracked so it cannot be
        // replayed immediately after the prune.
        assert!(peer.seen_iterations.contains(&5));
    }

    #[test]
    fn tampered_ciphertext_fails_without_recording_replay_state() {
        let mut own = OwnSenderKey::generate();
        let mut peer = OwnSenderKey::from_distribution_bytes(&own.to_distribution_bytes()).unwrap();
        let cfg = Config::default();

        let good_env = own.encrypt(b"hi").unwrap();
        let mut tampered = good_env.clone();
        *tampered.last_mut().unwrap() ^= 0xFF;
        assert!(peer.decrypt(&tampered, &cfg).is_err());
        // The iteration was never successfully decrypted, so the
        // untampered copy of the same iteration must still succeed.
        assert_eq!(peer.decrypt(&good_env, &cfg).unwrap(), b"hi");
    }
}
