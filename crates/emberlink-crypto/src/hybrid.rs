//! Hybrid message cipher for private/password sessions.
//!
//! Arbitrary-length payloads (text or base64 file blobs) are encrypted with
//! a fresh AES-256-GCM key per message; the key is wrapped with the
//! recipient's RSA public key. The result is a self-describing envelope
//! serialized as base64(JSON):
//!
//! ```text
//! { "wrappedKey": b64, "nonce": b64, "ciphertext": b64, "hybrid": true }
//! ```
//!
//! Encryption happens once per recipient: a message to N peers produces N
//! independent envelopes sharing one sender-assigned message id.
//!
//! Decryption keeps a legacy fallback: blobs without the `hybrid` marker
//! (or that are not JSON at all) predate the envelope and are treated as
//! direct RSA ciphertext of a single small message. That branch must stay —
//! the wire format is older than the envelope.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::{CryptoRng, RngCore};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::CryptoError;

/// Hard cap on hybrid payload size, applied post-encoding, pre-crypto.
pub const MAX_HYBRID_PAYLOAD_BYTES: usize = 20 * 1024 * 1024;

/// AES-GCM nonce size in bytes (96 bits).
const NONCE_BYTES: usize = 12;

/// Per-message symmetric key size in bytes (256 bits).
const MESSAGE_KEY_BYTES: usize = 32;

/// Wire form of the hybrid envelope.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HybridEnvelope {
    wrapped_key: String,
    nonce: String,
    ciphertext: String,
    hybrid: bool,
}

/// Encrypt `payload` for one recipient.
///
/// # Errors
///
/// - [`CryptoError::PayloadTooLarge`] if `payload` exceeds
///   [`MAX_HYBRID_PAYLOAD_BYTES`] — rejected before any crypto or network
///   work
pub fn seal_envelope(
    rng: &mut (impl CryptoRng + RngCore),
    payload: &[u8],
    recipient: &RsaPublicKey,
) -> Result<String, CryptoError> {
    if payload.len() > MAX_HYBRID_PAYLOAD_BYTES {
        return Err(CryptoError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_HYBRID_PAYLOAD_BYTES,
        });
    }

    let mut key_bytes = [0u8; MESSAGE_KEY_BYTES];
    rng.fill_bytes(&mut key_bytes);
    let mut nonce_bytes = [0u8; NONCE_BYTES];
    rng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&nonce_bytes), payload) else {
        unreachable!("AES-256-GCM encryption cannot fail with valid inputs");
    };

    let wrapped_key = recipient
        .encrypt(rng, Oaep::new::<Sha256>(), &key_bytes)
        .map_err(|e| CryptoError::KeyFormat { reason: e.to_string() })?;

    let envelope = HybridEnvelope {
        wrapped_key: BASE64.encode(wrapped_key),
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
        hybrid: true,
    };

    let Ok(json) = serde_json::to_vec(&envelope) else {
        unreachable!("envelope of base64 strings always serializes");
    };

    Ok(BASE64.encode(json))
}

/// Decrypt a blob produced by [`seal_envelope`], or a legacy direct-RSA blob.
///
/// # Errors
///
/// Every failure mode — key mismatch, tampered ciphertext, AEAD tag failure,
/// truncated fields — surfaces as [`CryptoError::DecryptionFailed`]. This is
/// the expected outcome for a message encrypted under a key pair from a
/// previous page load and must be rendered, not swallowed.
pub fn open_envelope(blob: &str, private_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    let outer = BASE64
        .decode(blob)
        .map_err(|e| CryptoError::DecryptionFailed { reason: format!("base64: {e}") })?;

    let Ok(envelope) = serde_json::from_slice::<HybridEnvelope>(&outer) else {
        // Pre-envelope wire format: the whole blob is direct RSA ciphertext.
        return decrypt_legacy(&outer, private_key);
    };

    if !envelope.hybrid {
        return decrypt_legacy(&outer, private_key);
    }

    let wrapped_key = BASE64
        .decode(&envelope.wrapped_key)
        .map_err(|e| CryptoError::DecryptionFailed { reason: format!("wrapped key: {e}") })?;

    let key_bytes = private_key
        .decrypt(Oaep::new::<Sha256>(), &wrapped_key)
        .map_err(|_| CryptoError::DecryptionFailed { reason: "key unwrap".to_string() })?;

    if key_bytes.len() != MESSAGE_KEY_BYTES {
        return Err(CryptoError::DecryptionFailed {
            reason: format!("unwrapped key is {} bytes", key_bytes.len()),
        });
    }

    let nonce_bytes = BASE64
        .decode(&envelope.nonce)
        .map_err(|e| CryptoError::DecryptionFailed { reason: format!("nonce: {e}") })?;

    if nonce_bytes.len() != NONCE_BYTES {
        return Err(CryptoError::DecryptionFailed {
            reason: format!("nonce is {} bytes", nonce_bytes.len()),
        });
    }

    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed { reason: format!("ciphertext: {e}") })?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication".to_string() })
}

/// Decrypt the pre-envelope wire format: one direct RSA-OAEP ciphertext.
fn decrypt_legacy(ciphertext: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed { reason: "rsa-oaep".to_string() })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::identity::tests::{test_key_pair, test_rng};
    use crate::identity::{MAX_DIRECT_PAYLOAD_BYTES, encrypt_direct};

    #[test]
    fn round_trip() {
        let keys = test_key_pair(1);
        let mut rng = test_rng();

        let blob = seal_envelope(&mut rng, b"hello across the relay", &keys.public).unwrap();
        let plaintext = open_envelope(&blob, &keys.private).unwrap();

        assert_eq!(plaintext, b"hello across the relay");
    }

    #[test]
    fn round_trip_empty_payload() {
        let keys = test_key_pair(1);
        let mut rng = test_rng();

        let blob = seal_envelope(&mut rng, b"", &keys.public).unwrap();
        assert_eq!(open_envelope(&blob, &keys.private).unwrap(), b"");
    }

    #[test]
    fn round_trip_large_payload() {
        let keys = test_key_pair(1);
        let mut rng = test_rng();

        // 256 KiB stands in for a base64 file blob.
        let payload = vec![0x42u8; 256 * 1024];
        let blob = seal_envelope(&mut rng, &payload, &keys.public).unwrap();

        assert_eq!(open_envelope(&blob, &keys.private).unwrap(), payload);
    }

    #[test]
    fn rejects_payload_over_cap() {
        let keys = test_key_pair(1);
        let mut rng = test_rng();

        let payload = vec![0u8; MAX_HYBRID_PAYLOAD_BYTES + 1];
        let result = seal_envelope(&mut rng, &payload, &keys.public);

        assert!(matches!(result, Err(CryptoError::PayloadTooLarge { .. })));
    }

    #[test]
    fn wrong_key_pair_fails() {
        let keys = test_key_pair(1);
        let other = test_key_pair(2);
        let mut rng = test_rng();

        let blob = seal_envelope(&mut rng, b"for keys only", &keys.public).unwrap();
        let result = open_envelope(&blob, &other.private);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn tampered_ciphertext_fails_never_garbage() {
        let keys = test_key_pair(1);
        let mut rng = test_rng();

        let blob = seal_envelope(&mut rng, b"integrity matters", &keys.public).unwrap();

        let outer = BASE64.decode(&blob).unwrap();
        let mut envelope: HybridEnvelope = serde_json::from_slice(&outer).unwrap();
        let mut ciphertext = BASE64.decode(&envelope.ciphertext).unwrap();
        ciphertext[0] ^= 0xFF;
        envelope.ciphertext = BASE64.encode(ciphertext);
        let tampered = BASE64.encode(serde_json::to_vec(&envelope).unwrap());

        let result = open_envelope(&tampered, &keys.private);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn tampered_nonce_fails() {
        let keys = test_key_pair(1);
        let mut rng = test_rng();

        let blob = seal_envelope(&mut rng, b"integrity matters", &keys.public).unwrap();

        let outer = BASE64.decode(&blob).unwrap();
        let mut envelope: HybridEnvelope = serde_json::from_slice(&outer).unwrap();
        let mut nonce = BASE64.decode(&envelope.nonce).unwrap();
        nonce[0] ^= 0x01;
        envelope.nonce = BASE64.encode(nonce);
        let tampered = BASE64.encode(serde_json::to_vec(&envelope).unwrap());

        let result = open_envelope(&tampered, &keys.private);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn legacy_direct_rsa_blob_still_opens() {
        let keys = test_key_pair(1);
        let mut rng = test_rng();

        // A blob produced before the hybrid envelope existed.
        let legacy = encrypt_direct(&mut rng, b"old wire format", &keys.public).unwrap();
        let plaintext = open_envelope(&legacy, &keys.private).unwrap();

        assert_eq!(plaintext, b"old wire format");
    }

    #[test]
    fn hybrid_false_marker_routes_to_legacy_path() {
        let keys = test_key_pair(1);

        let envelope = HybridEnvelope {
            wrapped_key: String::new(),
            nonce: String::new(),
            ciphertext: String::new(),
            hybrid: false,
        };
        let blob = BASE64.encode(serde_json::to_vec(&envelope).unwrap());

        // The JSON itself is not valid RSA ciphertext, so the legacy path
        // fails — but it must fail as DecryptionFailed, not a parse error.
        let result = open_envelope(&blob, &keys.private);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn non_base64_blob_fails_cleanly() {
        let keys = test_key_pair(1);
        let result = open_envelope("!!definitely not base64!!", &keys.private);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    proptest! {
        // RSA operations dominate runtime, keep the case count modest.
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn round_trips_arbitrary_payloads(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let keys = test_key_pair(1);
            let mut rng = test_rng();

            let blob = seal_envelope(&mut rng, &payload, &keys.public).unwrap();
            prop_assert_eq!(open_envelope(&blob, &keys.private).unwrap(), payload);
        }
    }

    #[test]
    fn envelopes_for_two_recipients_differ_but_open_to_same_plaintext() {
        let alice = test_key_pair(1);
        let bob = test_key_pair(2);
        let mut rng = test_rng();

        let for_alice = seal_envelope(&mut rng, b"fan-out", &alice.public).unwrap();
        let for_bob = seal_envelope(&mut rng, b"fan-out", &bob.public).unwrap();

        assert_ne!(for_alice, for_bob);
        assert_eq!(open_envelope(&for_alice, &alice.private).unwrap(), b"fan-out");
        assert_eq!(open_envelope(&for_bob, &bob.private).unwrap(), b"fan-out");
    }

    #[test]
    fn direct_payload_cap_is_below_hybrid_cap() {
        assert!(MAX_DIRECT_PAYLOAD_BYTES < MAX_HYBRID_PAYLOAD_BYTES);
    }
}
