//! C3 — X3DH asynchronous key agreement.
//!
//! References:
//!   - Signal X3DH spec: <https://signal.org/docs/specifications/x3dh/>
//!   - RFC 7748 (X25519), RFC 5869 (HKDF)
//!
//! The initiator reuses a single ephemeral key pair across every DH in the
//! set; the ephemeral public is carried explicitly in the first ratchet
//! header rather than reconstructed by the responder. This is the
//! committed resolution for the ambiguity in the responder-side DH
//! reconstruction — an earlier variant of this engine reused the peer's
//! identity key in place of a transmitted ephemeral for DH2/DH3, which
//! does not match the standard X3DH responder computation and must not be
//! reproduced.

use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::error::{CryptoError, Result};
use crate::identity::{IdentityKeyPair, PreKeyBundle, PublicKeyBytes};
use crate::primitives;

const X3DH_INFO: &[u8] = b"KuurierSignal";

/// Output of a completed X3DH handshake.
#[derive(Debug)]
pub struct X3dhResult {
    /// Feeds the Double Ratchet as the initial root key.
    pub master_secret: [u8; 32],
    /// Carried explicitly in the first ratchet header so the responder
    /// does not need to reconstruct it.
    pub ephemeral_public: X25519Public,
    pub used_one_time_id: Option<u32>,
}

/// Initiator ("Alice") half. Verifies the bundle's signed pre-key
/// signature before computing any DH — a server-supplied bundle is never
/// treated as pre-validated.
pub fn initiate(my_identity: &IdentityKeyPair, bundle: &PreKeyBundle) -> Result<X3dhResult> {
    let peer_identity_pub = bundle.identity_public;
    let spk_public = X25519Public::from(bundle.signed_prekey_public);

    IdentityKeyPair::verify(&peer_identity_pub, spk_public.as_bytes(), &bundle.signed_prekey_signature)
        .map_err(|_| CryptoError::SignatureInvalid)?;

    let own_identity_x = my_identity.x25519_secret();
    let peer_identity_x = crate::identity::ed25519_pub_to_x25519(&peer_identity_pub)?;

    let (ephemeral_secret, ephemeral_public) = primitives::x25519_keypair();

    let dh1 = primitives::x25519_agree(&own_identity_x, &spk_public)?;
    let dh2 = primitives::x25519_agree(&ephemeral_secret, &peer_identity_x)?;
    let dh3 = primitives::x25519_agree(&ephemeral_secret, &spk_public)?;

    let mut ikm = Vec::with_capacity(32 * 4);
    ikm.extend_from_slice(&dh1);
    ikm.extend_from_slice(&dh2);
    ikm.extend_from_slice(&dh3);

    let mut used_one_time_id = None;
    if let (Some(id), Some(opk_bytes)) = (bundle.one_time_prekey_id, bundle.one_time_prekey_public) {
        let opk_public = X25519Public::from(opk_bytes);
        let dh4 = primitives::x25519_agree(&ephemeral_secret, &opk_public)?;
        ikm.extend_from_slice(&dh4);
        used_one_time_id = Some(id);
    }

    let master_secret = primitives::hkdf_sha256_32(&ikm, Some(&[0u8; 32]), X3DH_INFO)?;
    ikm.zeroize();

    Ok(X3dhResult { master_secret, ephemeral_public, used_one_time_id })
}

/// Responder ("Bob") half. `peer_identity_pub` must come from the
/// directory's registered record for the claimed sender, not from the
/// transport message — callers perform the identity-pin comparison before
/// calling this (or pass the directory-fetched key here and compare
/// separately); either way a mismatch must short-circuit as
/// `IdentityKeyMismatch` before any DH runs.
pub fn respond(
    my_identity: &IdentityKeyPair,
    my_signed_prekey_secret: &StaticSecret,
    my_one_time_prekey_secret: Option<&StaticSecret>,
    peer_identity_pub: &PublicKeyBytes,
    peer_ephemeral_public: &X25519Public,
) -> Result<[u8; 32]> {
    let peer_identity_x = crate::identity::ed25519_pub_to_x25519(peer_identity_pub)?;
    let own_identity_x = my_identity.x25519_secret();

    // Mirror the initiator's DH set exactly (DH is commutative so operand
    // order does not matter, only which two secrets/publics are combined):
    //   DH1 = IK_A × SPK_B  -> SPK_B × IK_A
    //   DH2 = EK_A × IK_B   -> IK_B × EK_A
    //   DH3 = EK_A × SPK_B  -> SPK_B × EK_A
    let dh1 = primitives::x25519_agree(my_signed_prekey_secret, &peer_identity_x)?;
    let dh2 = primitives::x25519_agree(&own_identity_x, peer_ephemeral_public)?;
    let dh3 = primitives::x25519_agree(my_signed_prekey_secret, peer_ephemeral_public)?;

    let mut ikm = Vec::with_capacity(32 * 4);
    ikm.extend_from_slice(&dh1);
    ikm.extend_from_slice(&dh2);
    ikm.extend_from_slice(&dh3);

    if let Some(opk_secret) = my_one_time_prekey_secret {
        let dh4 = primitives::x25519_agree(opk_secret, peer_ephemeral_public)?;
        ikm.extend_from_slice(&dh4);
    }

    let master_secret = primitives::hkdf_sha256_32(&ikm, Some(&[0u8; 32]), X3DH_INFO)?;
    ikm.zeroize();

    Ok(master_secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{OneTimePreKey, SignedPreKey};

    fn bundle_from(
        peer_id: &str,
        identity: &IdentityKeyPair,
        spk: &SignedPreKey,
        opk: Option<&OneTimePreKey>,
    ) -> PreKeyBundle {
        PreKeyBundle {
            peer_id: peer_id.to_string(),
            registration_id: crate::identity::generate_registration_id(),
            identity_public: identity.public,
            signed_prekey_id: spk.id,
            signed_prekey_public: *spk.public.as_bytes(),
            signed_prekey_signature: spk.signature,
            one_time_prekey_id: opk.map(|k| k.id),
            one_time_prekey_public: opk.map(|k| *k.public.as_bytes()),
        }
    }

    #[test]
    fn roundtrip_without_one_time_prekey() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let bob_spk = SignedPreKey::generate(1, &bob, 0);

        let bundle = bundle_from("bob", &bob, &bob_spk, None);
        let result = initiate(&alice, &bundle).unwrap();

        let bob_secret = bob_spk.secret();
        let bob_master = respond(&bob, &bob_secret, None, &alice.public, &result.ephemeral_public).unwrap();

        assert_eq!(result.master_secret, bob_master);
        assert!(result.used_one_time_id.is_none());
    }

    #[test]
    fn roundtrip_with_one_time_prekey() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let bob_spk = SignedPreKey::generate(1, &bob, 0);
        let bob_opk = OneTimePreKey::generate(7);

        let bundle = bundle_from("bob", &bob, &bob_spk, Some(&bob_opk));
        let result = initiate(&alice, &bundle).unwrap();

        let bob_spk_secret = bob_spk.secret();
        let bob_opk_secret = bob_opk.secret();
        let bob_master = respond(
            &bob,
            &bob_spk_secret,
            Some(&bob_opk_secret),
            &alice.public,
            &result.ephemeral_public,
        )
        .unwrap();

        assert_eq!(result.master_secret, bob_master);
        assert_eq!(result.used_one_time_id, Some(7));
    }

    #[test]
    fn rejects_tampered_signed_prekey_signature() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let evil = IdentityKeyPair::generate();
        let bob_spk = SignedPreKey::generate(1, &bob, 0);

        let mut bundle = bundle_from("bob", &bob, &bob_spk, None);
        bundle.signed_prekey_signature = evil.sign(&bundle.signed_prekey_public);

        let err = initiate(&alice, &bundle).unwrap_err();
        assert!(matches!(err, CryptoError::SignatureInvalid));
    }

    #[test]
    fn degrades_gracefully_without_one_time_prekey() {
        // One-time prekey exhaustion is not a failure: the protocol must
        // still complete using only the three mandatory DHs.
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let bob_spk = SignedPreKey::generate(1, &bob, 0);
        let bundle = bundle_from("bob", &bob, &bob_spk, None);
        assert!(initiate(&alice, &bundle).is_ok());
    }
}
