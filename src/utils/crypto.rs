//! # Host Identity Verification
//!
//! Permanent hosts prove their identity by signing the server's random
//! challenge with their private key. The public key travels in the
//! handshake as text, so the verifier owns both the key encoding and the
//! signature scheme.
//!
//! [`Ed25519Verifier`] expects the public key as standard base64 of the
//! 32-byte Ed25519 key and the signature as the raw 64 bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::debug;

use crate::error::{ProtocolError, Result};

/// Length of the handshake challenge in bytes.
pub const CHALLENGE_LEN: usize = 32;

/// Checks that `signature` over `challenge` was made by `public_key`.
pub trait SignatureVerifier: Send + Sync {
    /// Returns false for malformed keys or signatures as well as for
    /// signatures that do not match.
    fn verify(&self, challenge: &[u8], public_key: &str, signature: &[u8]) -> bool;
}

/// Ed25519 verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    /// Text form of a verifying key as hosts send it.
    pub fn encode_public_key(key: &VerifyingKey) -> String {
        STANDARD.encode(key.to_bytes())
    }

    fn decode_public_key(public_key: &str) -> Option<VerifyingKey> {
        let bytes = STANDARD.decode(public_key.trim()).ok()?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().ok()?;
        VerifyingKey::from_bytes(&bytes).ok()
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, challenge: &[u8], public_key: &str, signature: &[u8]) -> bool {
        let Some(key) = Self::decode_public_key(public_key) else {
            debug!("Public key is not a base64 Ed25519 key");
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
            debug!(len = signature.len(), "Signature has the wrong length");
            return false;
        };
        key.verify(challenge, &Signature::from_bytes(&sig_bytes))
            .is_ok()
    }
}

/// Fill a fresh challenge from the OS entropy source.
pub fn generate_challenge() -> Result<[u8; CHALLENGE_LEN]> {
    let mut challenge = [0u8; CHALLENGE_LEN];
    getrandom::fill(&mut challenge)
        .map_err(|e| ProtocolError::Entropy(e.to_string()))?;
    Ok(challenge)
}
