//! Shared-session cipher for group mode.
//!
//! One AES-256-GCM key per group session. The creator mints it, wraps it
//! with each member's RSA public key, and re-distributes whenever
//! membership changes. All broadcast traffic uses the key directly — no
//! per-message key wrap, so the wire format is just base64(nonce ‖
//! ciphertext), simpler than the hybrid envelope.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::{CryptoRng, RngCore};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Session key size in bytes (256 bits).
pub const SESSION_KEY_BYTES: usize = 32;

/// AES-GCM nonce size in bytes (96 bits).
const NONCE_BYTES: usize = 12;

/// The shared symmetric key of one group session.
///
/// Exportable by design — distribution wraps the raw bytes per member.
/// Zeroized on drop; leaving a session drops the key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_BYTES]);

impl SessionKey {
    fn from_bytes(bytes: [u8; SESSION_KEY_BYTES]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Deliberately omits key material.
        f.debug_struct("SessionKey").finish_non_exhaustive()
    }
}

/// Mint a fresh session key. Creator-only in the protocol.
pub fn generate_session_key(rng: &mut (impl CryptoRng + RngCore)) -> SessionKey {
    let mut bytes = [0u8; SESSION_KEY_BYTES];
    rng.fill_bytes(&mut bytes);
    SessionKey::from_bytes(bytes)
}

/// Wrap the session key for one member: RSA-OAEP over the raw key bytes,
/// base64 encoded.
pub fn wrap_for_member(
    rng: &mut (impl CryptoRng + RngCore),
    session_key: &SessionKey,
    member_key: &RsaPublicKey,
) -> Result<String, CryptoError> {
    let wrapped = member_key
        .encrypt(rng, Oaep::new::<Sha256>(), &session_key.0)
        .map_err(|e| CryptoError::KeyFormat { reason: e.to_string() })?;

    Ok(BASE64.encode(wrapped))
}

/// Unwrap a received session key with our own private key.
pub fn unwrap_received(
    wrapped: &str,
    private_key: &RsaPrivateKey,
) -> Result<SessionKey, CryptoError> {
    let bytes = BASE64
        .decode(wrapped)
        .map_err(|e| CryptoError::DecryptionFailed { reason: format!("base64: {e}") })?;

    let mut raw = private_key
        .decrypt(Oaep::new::<Sha256>(), &bytes)
        .map_err(|_| CryptoError::DecryptionFailed { reason: "key unwrap".to_string() })?;

    if raw.len() != SESSION_KEY_BYTES {
        raw.zeroize();
        return Err(CryptoError::DecryptionFailed {
            reason: format!("unwrapped key is {} bytes", raw.len()),
        });
    }

    let mut bytes = [0u8; SESSION_KEY_BYTES];
    bytes.copy_from_slice(&raw);
    raw.zeroize();

    Ok(SessionKey::from_bytes(bytes))
}

/// Encrypt one broadcast message with the shared key.
///
/// Generates a random 96-bit nonce and returns base64(nonce ‖ ciphertext).
pub fn encrypt_message(
    rng: &mut (impl CryptoRng + RngCore),
    plaintext: &[u8],
    session_key: &SessionKey,
) -> String {
    let mut nonce_bytes = [0u8; NONCE_BYTES];
    rng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&session_key.0));
    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&nonce_bytes), plaintext) else {
        unreachable!("AES-256-GCM encryption cannot fail with valid inputs");
    };

    let mut combined = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    BASE64.encode(combined)
}

/// Decrypt one broadcast message: split the first 12 bytes as the nonce,
/// decrypt the remainder.
pub fn decrypt_message(blob: &str, session_key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
    let combined = BASE64
        .decode(blob)
        .map_err(|e| CryptoError::DecryptionFailed { reason: format!("base64: {e}") })?;

    if combined.len() < NONCE_BYTES {
        return Err(CryptoError::DecryptionFailed {
            reason: format!("blob of {} bytes is shorter than a nonce", combined.len()),
        });
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_BYTES);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&session_key.0));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication".to_string() })
}
