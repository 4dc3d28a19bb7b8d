//! Pre-key bundle and sender-key distribution wire shapes for the
//! directory interface (spec §6.1).
//!
//! `kuurier-crypto`'s `Directory` trait works with native byte-array types
//! (`DirectoryBundle`, `EncryptedSenderKeyEntry`) and never depends on this
//! crate. These wire types are the base64/JSON shapes an actual transport
//! puts on the wire; conversion happens entirely on this side.

use base64::Engine;
use serde::{Deserialize, Serialize};

use kuurier_crypto::error::{CryptoError, Result};
use kuurier_crypto::identity::PublicKeyBytes;
use kuurier_crypto::keystore::{DirectoryBundle, EncryptedSenderKeyEntry, PreKeyPublic, SignedPreKeyPublic};

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn unb64(s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD.decode(s).map_err(|_| CryptoError::InvalidPublicKey)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKeyWire {
    pub id: u32,
    pub public: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyWire {
    pub id: u32,
    pub public: String,
}

/// Wire form of [`DirectoryBundle`] — what `Directory::fetch_bundle`
/// actually returns over an HTTP/JSON transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrekeyBundleWire {
    pub identity_public: String,
    pub registration_id: u16,
    pub signed_prekey: SignedPreKeyWire,
    pub one_time_prekey: Option<PreKeyWire>,
}

impl PrekeyBundleWire {
    pub fn from_directory_bundle(bundle: &DirectoryBundle) -> Self {
        Self {
            identity_public: b64(&bundle.identity_public.0),
            registration_id: bundle.registration_id,
            signed_prekey: SignedPreKeyWire {
                id: bundle.signed_prekey.id,
                public: b64(&bundle.signed_prekey.public),
                signature: b64(&bundle.signed_prekey.signature),
            },
            one_time_prekey: bundle.one_time_prekey.map(|k| PreKeyWire { id: k.id, public: b64(&k.public) }),
        }
    }

    pub fn into_directory_bundle(self) -> Result<DirectoryBundle> {
        let identity_public = PublicKeyBytes::from_slice(&unb64(&self.identity_public)?)?;
        let signed_prekey_public: [u8; 32] =
            unb64(&self.signed_prekey.public)?.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        let signed_prekey_signature: [u8; 64] =
            unb64(&self.signed_prekey.signature)?.try_into().map_err(|_| CryptoError::InvalidMessage)?;

        let one_time_prekey = match self.one_time_prekey {
            Some(otk) => {
                let public: [u8; 32] = unb64(&otk.public)?.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
                Some(PreKeyPublic { id: otk.id, public })
            }
            None => None,
        };

        Ok(DirectoryBundle {
            identity_public,
            registration_id: self.registration_id,
            signed_prekey: SignedPreKeyPublic {
                id: self.signed_prekey.id,
                public: signed_prekey_public,
                signature: signed_prekey_signature,
            },
            one_time_prekey,
        })
    }
}

/// Wire form of [`EncryptedSenderKeyEntry`] — what the directory returns
/// from `fetch_encrypted_sender_keys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedSenderKeyEntryWire {
    pub sender_id: String,
    pub distribution_id: String,
    pub ciphertext: String,
}

impl EncryptedSenderKeyEntryWire {
    pub fn from_entry(entry: &EncryptedSenderKeyEntry) -> Self {
        Self {
            sender_id: entry.sender_id.clone(),
            distribution_id: b64(&entry.distribution_id),
            ciphertext: b64(&entry.ciphertext),
        }
    }

    pub fn into_entry(self) -> Result<EncryptedSenderKeyEntry> {
        let distribution_id: [u8; 16] =
            unb64(&self.distribution_id)?.try_into().map_err(|_| CryptoError::InvalidMessage)?;
        let ciphertext = unb64(&self.ciphertext)?;
        Ok(EncryptedSenderKeyEntry { sender_id: self.sender_id, distribution_id, ciphertext })
    }
}
