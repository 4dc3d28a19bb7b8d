//! kuurier-crypto — end-to-end encryption core.
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Public APIs return opaque newtypes to prevent accidental misuse.
//!
//! # Module layout
//! - `primitives`  — C1: X25519/Ed25519/HKDF/HMAC/AES-256-GCM facade
//! - `identity`    — long-term identity keys, registration ids, pre-key material
//! - `x3dh`        — C3: X3DH asynchronous key agreement
//! - `ratchet`      — C4: Double Ratchet per-peer session state
//! - `sender_key`  — C5: Sender-Key group encryption
//! - `keystore`    — `KeyStore` / `Directory` capability traits
//! - `session`     — orchestration: per-peer and per-channel session management
//! - `codec`       — byte-exact wire formats (spec §6.3)
//! - `config`      — enumerated tunables
//! - `traits`      — `Clock` / `Rng` capability interfaces
//! - `error`       — unified error type

pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod keystore;
pub mod primitives;
pub mod ratchet;
pub mod sender_key;
pub mod session;
pub mod traits;
pub mod x3dh;

pub use error::CryptoError;

/// `serde` only provides array impls up to length 32; this shim serializes
/// a `[u8; 64]` as a byte sequence so `#[derive(Serialize, Deserialize)]`
/// can be used on structs carrying a 64-byte signature.
pub(crate) mod serde_sig64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error> {
        bytes.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 64], D::Error> {
        let v: Vec<u8> = Vec::deserialize(deserializer)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 bytes"))
    }
}
