//! Byte-exact wire formats (spec §6.3).
//!
//! These are cross-implementation wire contracts, not internal data
//! structures, so they are hand-rolled fixed-width encodings rather than
//! routed through `serde_json` the way the device-cert-style records are
//! elsewhere in this crate. All multi-byte integers are little-endian.

use crate::error::{CryptoError, Result};

/// 1:1 ratchet header: `ratchet_pub[32] ‖ prev_chain_length:u32 ‖
/// message_number:u32` (40 bytes). Doubles as the envelope's AEAD
/// associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatchetHeader {
    pub ratchet_pub: [u8; 32],
    pub prev_chain_length: u32,
    pub message_number: u32,
}

pub const RATCHET_HEADER_LEN: usize = 40;

impl RatchetHeader {
    pub fn encode(&self) -> [u8; RATCHET_HEADER_LEN] {
        let mut out = [0u8; RATCHET_HEADER_LEN];
        out[..32].copy_from_slice(&self.ratchet_pub);
        out[32..36].copy_from_slice(&self.prev_chain_length.to_le_bytes());
        out[36..40].copy_from_slice(&self.message_number.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RATCHET_HEADER_LEN {
            return Err(CryptoError::InvalidHeader);
        }
        let mut ratchet_pub = [0u8; 32];
        ratchet_pub.copy_from_slice(&bytes[..32]);
        let prev_chain_length = u32::from_le_bytes(bytes[32..36].try_into().unwrap());
        let message_number = u32::from_le_bytes(bytes[36..40].try_into().unwrap());
        Ok(Self { ratchet_pub, prev_chain_length, message_number })
    }
}

/// `header_length:u16 ‖ header[header_length] ‖ aead_combined[..]`.
pub fn encode_ratchet_envelope(header_bytes: &[u8; RATCHET_HEADER_LEN], combined_ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + header_bytes.len() + combined_ciphertext.len());
    out.extend_from_slice(&(header_bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(header_bytes);
    out.extend_from_slice(combined_ciphertext);
    out
}

/// Returns the parsed header, the raw header bytes (used as AEAD AAD), and
/// the combined ciphertext slice.
pub fn decode_ratchet_envelope(bytes: &[u8]) -> Result<(RatchetHeader, &[u8], &[u8])> {
    if bytes.len() < 2 {
        return Err(CryptoError::InvalidMessage);
    }
    let header_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    if bytes.len() < 2 + header_len {
        return Err(CryptoError::InvalidMessage);
    }
    let header_bytes = &bytes[2..2 + header_len];
    let header = RatchetHeader::decode(header_bytes)?;
    let ciphertext = &bytes[2 + header_len..];
    Ok((header, header_bytes, ciphertext))
}

/// First-message handshake header: carries the initiator's X3DH ephemeral
/// public key explicitly (spec §9 open-question resolution — the
/// responder never reconstructs it) plus the one-time pre-key id it
/// consumed, if any. Wraps exactly the first ratchet envelope of a new
/// session; every later envelope on that session is a plain ratchet
/// envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X3dhHeader {
    pub ephemeral_public: [u8; 32],
    pub one_time_prekey_id: Option<u32>,
}

pub const X3DH_HEADER_LEN: usize = 32 + 1 + 4;

impl X3dhHeader {
    pub fn encode(&self) -> [u8; X3DH_HEADER_LEN] {
        let mut out = [0u8; X3DH_HEADER_LEN];
        out[..32].copy_from_slice(&self.ephemeral_public);
        match self.one_time_prekey_id {
            Some(id) => {
                out[32] = 1;
                out[33..37].copy_from_slice(&id.to_le_bytes());
            }
            None => out[32] = 0,
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != X3DH_HEADER_LEN {
            return Err(CryptoError::InvalidHeader);
        }
        let mut ephemeral_public = [0u8; 32];
        ephemeral_public.copy_from_slice(&bytes[..32]);
        let one_time_prekey_id = match bytes[32] {
            0 => None,
            1 => Some(u32::from_le_bytes(bytes[33..37].try_into().unwrap())),
            _ => return Err(CryptoError::InvalidHeader),
        };
        Ok(Self { ephemeral_public, one_time_prekey_id })
    }
}

/// `header_length:u16 ‖ x3dh_header[header_length] ‖ ratchet_envelope[..]`.
pub fn encode_handshake_envelope(header: &X3dhHeader, ratchet_envelope: &[u8]) -> Vec<u8> {
    let header_bytes = header.encode();
    let mut out = Vec::with_capacity(2 + header_bytes.len() + ratchet_envelope.len());
    out.extend_from_slice(&(header_bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(ratchet_envelope);
    out
}

pub fn decode_handshake_envelope(bytes: &[u8]) -> Result<(X3dhHeader, &[u8])> {
    if bytes.len() < 2 {
        return Err(CryptoError::InvalidMessage);
    }
    let header_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    if bytes.len() < 2 + header_len {
        return Err(CryptoError::InvalidMessage);
    }
    let header = X3dhHeader::decode(&bytes[2..2 + header_len])?;
    Ok((header, &bytes[2 + header_len..]))
}

/// Signed pre-key storage blob: `key_id:u32 ‖ timestamp:f64 ‖ signature[64]
/// ‖ priv[32]` (108 bytes).
pub const SIGNED_PREKEY_BLOB_LEN: usize = 4 + 8 + 64 + 32;

pub fn encode_signed_prekey_blob(id: u32, timestamp_unix: f64, signature: &[u8; 64], secret: &[u8; 32]) -> [u8; SIGNED_PREKEY_BLOB_LEN] {
    let mut out = [0u8; SIGNED_PREKEY_BLOB_LEN];
    out[..4].copy_from_slice(&id.to_le_bytes());
    out[4..12].copy_from_slice(&timestamp_unix.to_le_bytes());
    out[12..76].copy_from_slice(signature);
    out[76..108].copy_from_slice(secret);
    out
}

pub fn decode_signed_prekey_blob(bytes: &[u8]) -> Result<(u32, f64, [u8; 64], [u8; 32])> {
    if bytes.len() != SIGNED_PREKEY_BLOB_LEN {
        return Err(CryptoError::InvalidMessage);
    }
    let id = u32::from_le_bytes(bytes[..4].try_into().unwrap());
    let timestamp = f64::from_le_bytes(bytes[4..12].try_into().unwrap());
    let mut signature = [0u8; 64];
    signature.copy_from_slice(&bytes[12..76]);
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&bytes[76..108]);
    Ok((id, timestamp, signature, secret))
}

/// Group ciphertext envelope: `distribution_id[16] ‖ iteration:u32 ‖
/// aead_combined[..]`. `distribution_id` is a UUID-v4's raw 16 bytes.
pub fn encode_group_envelope(distribution_id: &[u8; 16], iteration: u32, combined_ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + 4 + combined_ciphertext.len());
    out.extend_from_slice(distribution_id);
    out.extend_from_slice(&iteration.to_le_bytes());
    out.extend_from_slice(combined_ciphertext);
    out
}

pub fn decode_group_envelope(bytes: &[u8]) -> Result<([u8; 16], u32, &[u8])> {
    if bytes.len() < 20 {
        return Err(CryptoError::InvalidMessage);
    }
    let mut distribution_id = [0u8; 16];
    distribution_id.copy_from_slice(&bytes[..16]);
    let iteration = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    Ok((distribution_id, iteration, &bytes[20..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratchet_header_round_trips() {
        let header = RatchetHeader { ratchet_pub: [9u8; 32], prev_chain_length: 3, message_number: 7 };
        let encoded = header.encode();
        assert_eq!(encoded.len(), RATCHET_HEADER_LEN);
        let decoded = RatchetHeader::decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn ratchet_envelope_round_trips() {
        let header = RatchetHeader { ratchet_pub: [1u8; 32], prev_chain_length: 0, message_number: 0 };
        let header_bytes = header.encode();
        let combined = b"ciphertext-and-tag";
        let envelope = encode_ratchet_envelope(&header_bytes, combined);
        let (decoded_header, decoded_header_bytes, decoded_ciphertext) = decode_ratchet_envelope(&envelope).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(decoded_header_bytes, &header_bytes);
        assert_eq!(decoded_ciphertext, combined);
    }

    #[test]
    fn rejects_truncated_envelope() {
        let bytes = [0u8, 40]; // claims a 40*256-byte header, only 2 bytes present
        assert!(decode_ratchet_envelope(&bytes).is_err());
    }

    #[test]
    fn signed_prekey_blob_round_trips() {
        let blob = encode_signed_prekey_blob(42, 12345.5, &[7u8; 64], &[3u8; 32]);
        let (id, ts, sig, secret) = decode_signed_prekey_blob(&blob).unwrap();
        assert_eq!(id, 42);
        assert_eq!(ts, 12345.5);
        assert_eq!(sig, [7u8; 64]);
        assert_eq!(secret, [3u8; 32]);
    }

    #[test]
    fn x3dh_header_round_trips_with_and_without_one_time_prekey() {
        let with_otk = X3dhHeader { ephemeral_public: [2u8; 32], one_time_prekey_id: Some(9) };
        assert_eq!(X3dhHeader::decode(&with_otk.encode()).unwrap(), with_otk);

        let without_otk = X3dhHeader { ephemeral_public: [3u8; 32], one_time_prekey_id: None };
        assert_eq!(X3dhHeader::decode(&without_otk.encode()).unwrap(), without_otk);
    }

    #[test]
    fn handshake_envelope_round_trips() {
        let header = X3dhHeader { ephemeral_public: [4u8; 32], one_time_prekey_id: Some(1) };
        let inner = b"ratchet-envelope-bytes";
        let wrapped = encode_handshake_envelope(&header, inner);
        let (decoded_header, decoded_inner) = decode_handshake_envelope(&wrapped).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(decoded_inner, inner);
    }

    #[test]
    fn group_envelope_round_trips() {
        let distribution_id = [5u8; 16];
        let envelope = encode_group_envelope(&distribution_id, 3, b"combined");
        let (id, iteration, ciphertext) = decode_group_envelope(&envelope).unwrap();
        assert_eq!(id, distribution_id);
        assert_eq!(iteration, 3);
        assert_eq!(ciphertext, b"combined");
    }
}
