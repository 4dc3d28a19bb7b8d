//! kuurier-store — encrypted local persistence for the `KeyStore` capability
//! (spec §4.2).
//!
//! # Encryption strategy
//! SQLite does not natively encrypt. Every column carrying long-term secret
//! material (identity secret, pre-key secrets, ratchet state, sender-key
//! map) is stored as XChaCha20-Poly1305 ciphertext, base64-encoded. The
//! vault key is derived from the account password via Argon2id and held in
//! memory only while the vault is unlocked.
//!
//! # Migrations
//! SQLx migrations in `migrations/` run automatically on `Store::open`.

pub mod aead;
pub mod db;
pub mod error;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod vault;

pub use db::Store;
pub use error::StoreError;
pub use memory::MemoryKeyStore;
pub use vault::Vault;
