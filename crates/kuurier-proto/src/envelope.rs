//! Transport-level envelopes — what a relay sees (spec §6.2, "routing
//! metadata alongside opaque crypto core output").
//!
//! The crypto core already produces one self-describing opaque byte blob
//! per call (`SessionManager::encrypt_to_peer` / `encrypt_to_channel`) —
//! handshake header, ratchet header, and ciphertext are all encoded inside
//! it. This module adds only what a relay needs to route that blob: who
//! sent it, who it is for, and when.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// On-wire 1:1 envelope — sent to and received from the relay. Everything
/// inside `ciphertext` is opaque to the transport layer; only the fields
/// here are needed for routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Random id, no cryptographic meaning — used for ack/dedup.
    pub envelope_id: String,
    /// Protocol version for forward compatibility.
    pub version: u8,
    pub sender_id: String,
    pub recipient_id: String,
    /// Set by the sender; a relay should set its own received time and
    /// reject envelopes with excessive clock skew rather than trust this.
    pub sent_at: DateTime<Utc>,
    /// Base64 of the opaque bytes returned by `SessionManager::encrypt_to_peer`.
    pub ciphertext: String,
}

impl Envelope {
    pub fn new(envelope_id: String, sender_id: String, recipient_id: String, sent_at: DateTime<Utc>, ciphertext: &[u8]) -> Self {
        Self {
            envelope_id,
            version: 1,
            sender_id,
            recipient_id,
            sent_at,
            ciphertext: base64::engine::general_purpose::STANDARD.encode(ciphertext),
        }
    }

    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.ciphertext)
    }
}

/// On-wire group envelope — sent to and received from the relay for a
/// channel. Same routing/opacity split as [`Envelope`], keyed by channel
/// rather than a single recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEnvelope {
    pub envelope_id: String,
    pub version: u8,
    pub channel_id: String,
    pub sender_id: String,
    pub sent_at: DateTime<Utc>,
    /// Base64 of the opaque bytes returned by `SessionManager::encrypt_to_channel`.
    pub ciphertext: String,
}

impl GroupEnvelope {
    pub fn new(envelope_id: String, channel_id: String, sender_id: String, sent_at: DateTime<Utc>, ciphertext: &[u8]) -> Self {
        Self {
            envelope_id,
            version: 1,
            channel_id,
            sender_id,
            sent_at,
            ciphertext: base64::engine::general_purpose::STANDARD.encode(ciphertext),
        }
    }

    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_ciphertext_round_trips_through_base64() {
        let env = Envelope::new("e1".into(), "alice".into(), "bob".into(), Utc::now(), b"opaque bytes");
        assert_eq!(env.ciphertext_bytes().unwrap(), b"opaque bytes");
    }

    #[test]
    fn group_envelope_ciphertext_round_trips_through_base64() {
        let env = GroupEnvelope::new("e1".into(), "channel-1".into(), "alice".into(), Utc::now(), b"group bytes");
        assert_eq!(env.ciphertext_bytes().unwrap(), b"group bytes");
    }
}
