//! kuurier-proto — wire envelopes and directory-interface types for the
//! end-to-end encryption core (spec §6.1, §6.2).
//!
//! The crypto core (`kuurier-crypto`) never depends on this crate; it only
//! guarantees that its own wire format (`codec.rs` there) round-trips the
//! byte fields it defines. This crate supplies the transport-facing shapes
//! that carry those opaque bytes, plus JSON-friendly forms of the
//! `Directory` capability's data.
//!
//! # Modules
//! - `envelope` — `Envelope` / `GroupEnvelope`: routing metadata plus opaque ciphertext
//! - `bundle`   — wire shapes for pre-key bundles and sender-key distribution

pub mod bundle;
pub mod envelope;

pub use bundle::{EncryptedSenderKeyEntryWire, PrekeyBundleWire};
pub use envelope::{Envelope, GroupEnvelope};
