//! Unified error taxonomy surfaced to callers of the crypto core.
//!
//! Grouped as config/state, framing, cryptographic, protocol, and
//! directory/storage failures. No variant carries enough detail to
//! distinguish, say, a MAC mismatch from a missing chain key from outside
//! the crate — that distinction belongs in `tracing::debug!` call sites,
//! never in the returned error (see propagation policy in the crypto core
//! spec).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    // ── Config / state ───────────────────────────────────────────────
    #[error("no identity key present")]
    NoIdentity,

    #[error("no session established with this peer")]
    NoSession,

    #[error("no sending chain established")]
    NoSendingChain,

    #[error("no receiving chain established")]
    NoReceivingChain,

    #[error("session state is corrupted and must be reset")]
    SessionCorrupted,

    // ── Framing ──────────────────────────────────────────────────────
    #[error("invalid envelope header")]
    InvalidHeader,

    #[error("invalid envelope message")]
    InvalidMessage,

    #[error("invalid public key material")]
    InvalidPublicKey,

    // ── Cryptographic ────────────────────────────────────────────────
    #[error("Diffie-Hellman agreement failed")]
    AgreementFailed,

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("peer identity key does not match the directory-registered key")]
    IdentityKeyMismatch,

    #[error("decryption failed (authentication tag mismatch)")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    // ── Protocol ─────────────────────────────────────────────────────
    #[error("message already decrypted")]
    MessageAlreadyDecrypted,

    #[error("too many skipped messages")]
    TooManySkippedMessages,

    #[error("distribution id does not match the cached sender key")]
    InvalidDistributionId,

    #[error("replay detected")]
    ReplayDetected,

    #[error("no sender key known for this (channel, sender) pair")]
    SenderKeyNotFound,

    // ── Directory / storage ────────────────────────────────────────────
    #[error("directory service unavailable")]
    DirectoryUnavailable,

    #[error("storage backend unavailable")]
    StorageUnavailable,

    // ── Internal — not part of the taxonomy surfaced to application code,
    // but needed to plumb lower-level failures through `?` before they are
    // mapped to one of the variants above.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
