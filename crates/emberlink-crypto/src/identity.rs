//! Identity key pairs: RSA-OAEP (SHA-256), 2048-bit.
//!
//! The identity layer bootstraps all trust in a session: public keys travel
//! through the relay's roster, and both ciphers wrap their symmetric keys
//! with them. Key pairs are generated fresh per chat session and never
//! persisted.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::{CryptoRng, RngCore};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::CryptoError;

/// RSA modulus size in bits.
const RSA_BITS: usize = 2048;

/// Maximum payload for direct RSA-OAEP encryption.
///
/// OAEP capacity is `k - 2*hLen - 2`: 256 - 64 - 2 bytes for a 2048-bit
/// modulus with SHA-256. Anything larger must go through the hybrid cipher.
pub const MAX_DIRECT_PAYLOAD_BYTES: usize = 190;

/// A participant's ephemeral identity key pair.
///
/// The caller owns the lifetime; dropping it is the only way key material
/// goes away, and it always does at session end.
#[derive(Clone)]
pub struct IdentityKeyPair {
    /// Public half, exported into the session roster.
    pub public: RsaPublicKey,
    /// Private half. Never serialized, never leaves the process.
    pub private: RsaPrivateKey,
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Deliberately omits key material.
        f.debug_struct("IdentityKeyPair").finish_non_exhaustive()
    }
}

/// Generate a fresh 2048-bit RSA-OAEP key pair.
pub fn generate_key_pair(
    rng: &mut (impl CryptoRng + RngCore),
) -> Result<IdentityKeyPair, CryptoError> {
    let private = RsaPrivateKey::new(rng, RSA_BITS)
        .map_err(|e| CryptoError::KeyGeneration { reason: e.to_string() })?;
    let public = RsaPublicKey::from(&private);

    Ok(IdentityKeyPair { public, private })
}

/// Serialize a public key to a transport-safe string (base64 of SPKI DER).
pub fn export_public_key(key: &RsaPublicKey) -> Result<String, CryptoError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| CryptoError::KeyFormat { reason: e.to_string() })?;

    Ok(BASE64.encode(der.as_bytes()))
}

/// Parse a public key previously produced by [`export_public_key`].
pub fn import_public_key(exported: &str) -> Result<RsaPublicKey, CryptoError> {
    let der = BASE64
        .decode(exported)
        .map_err(|e| CryptoError::KeyFormat { reason: format!("base64: {e}") })?;

    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| CryptoError::KeyFormat { reason: format!("spki: {e}") })
}

/// Encrypt a small payload directly with RSA-OAEP.
///
/// Single-small-message use only (key wraps, bootstrap blobs) — NOT for
/// chat content. Returns base64 ciphertext.
///
/// # Errors
///
/// - [`CryptoError::PayloadTooLarge`] if `payload` exceeds the OAEP capacity
///   — callers must not truncate
pub fn encrypt_direct(
    rng: &mut (impl CryptoRng + RngCore),
    payload: &[u8],
    public_key: &RsaPublicKey,
) -> Result<String, CryptoError> {
    if payload.len() > MAX_DIRECT_PAYLOAD_BYTES {
        return Err(CryptoError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_DIRECT_PAYLOAD_BYTES,
        });
    }

    let ciphertext = public_key
        .encrypt(rng, Oaep::new::<Sha256>(), payload)
        .map_err(|e| CryptoError::KeyFormat { reason: e.to_string() })?;

    Ok(BASE64.encode(ciphertext))
}

/// Invert [`encrypt_direct`].
pub fn decrypt_direct(
    ciphertext: &str,
    private_key: &RsaPrivateKey,
) -> Result<Vec<u8>, CryptoError> {
    let bytes = BASE64
        .decode(ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed { reason: format!("base64: {e}") })?;

    private_key
        .decrypt(Oaep::new::<Sha256>(), &bytes)
        .map_err(|_| CryptoError::DecryptionFailed { reason: "rsa-oaep".to_string() })
}

#[cfg(test)]
pub(crate) mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    /// Deterministic key pair for the crate's tests. 2048-bit generation is
    /// slow, so tests share seeds rather than regenerating per assertion.
    pub(crate) fn test_key_pair(seed: u64) -> IdentityKeyPair {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        generate_key_pair(&mut rng).unwrap()
    }

    pub(crate) fn test_rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(0x0ddba11)
    }

    #[test]
    fn export_import_round_trip() {
        let keys = test_key_pair(1);

        let exported = export_public_key(&keys.public).unwrap();
        let imported = import_public_key(&exported).unwrap();

        assert_eq!(imported, keys.public);
    }

    #[test]
    fn import_rejects_garbage() {
        assert!(matches!(
            import_public_key("not base64 at all!!"),
            Err(CryptoError::KeyFormat { .. })
        ));

        // Valid base64, invalid SPKI.
        let bogus = BASE64.encode(b"0123456789abcdef");
        assert!(matches!(import_public_key(&bogus), Err(CryptoError::KeyFormat { .. })));
    }

    #[test]
    fn direct_round_trip() {
        let keys = test_key_pair(1);
        let mut rng = test_rng();

        let ciphertext = encrypt_direct(&mut rng, b"short secret", &keys.public).unwrap();
        let plaintext = decrypt_direct(&ciphertext, &keys.private).unwrap();

        assert_eq!(plaintext, b"short secret");
    }

    #[test]
    fn direct_rejects_oversized_payload() {
        let keys = test_key_pair(1);
        let mut rng = test_rng();

        let payload = vec![0u8; MAX_DIRECT_PAYLOAD_BYTES + 1];
        let result = encrypt_direct(&mut rng, &payload, &keys.public);

        assert!(matches!(result, Err(CryptoError::PayloadTooLarge { size: 191, max: 190 })));
    }

    #[test]
    fn direct_accepts_payload_at_capacity() {
        let keys = test_key_pair(1);
        let mut rng = test_rng();

        let payload = vec![0x42u8; MAX_DIRECT_PAYLOAD_BYTES];
        let ciphertext = encrypt_direct(&mut rng, &payload, &keys.public).unwrap();

        assert_eq!(decrypt_direct(&ciphertext, &keys.private).unwrap(), payload);
    }

    #[test]
    fn wrong_private_key_fails_cleanly() {
        let keys = test_key_pair(1);
        let other = test_key_pair(2);
        let mut rng = test_rng();

        let ciphertext = encrypt_direct(&mut rng, b"secret", &keys.public).unwrap();
        let result = decrypt_direct(&ciphertext, &other.private);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn debug_never_prints_key_material() {
        let keys = test_key_pair(1);
        let rendered = format!("{keys:?}");

        assert!(!rendered.contains("private"));
        assert_eq!(rendered, "IdentityKeyPair { .. }");
    }
}
