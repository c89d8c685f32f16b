//! Crypto error types.

/// Errors from cryptographic operations.
///
/// All variants are local to the client performing the operation and
/// terminal for that operation only.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Key generation failed.
    ///
    /// Practically unreachable with a functioning RNG; surfaced rather than
    /// panicking so the caller decides how to die.
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        /// Underlying failure.
        reason: String,
    },

    /// Malformed key material (import, export, or unwrap input).
    #[error("invalid key material: {reason}")]
    KeyFormat {
        /// What was wrong with it.
        reason: String,
    },

    /// Payload exceeds a hard size bound.
    ///
    /// Must be surfaced to the user before any network call; callers never
    /// truncate.
    #[error("payload of {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge {
        /// Offending payload size.
        size: usize,
        /// The enforced limit.
        max: usize,
    },

    /// Decryption or authentication failed.
    ///
    /// Covers key mismatch, tampered ciphertext, and AEAD tag failure. On
    /// receive this is the expected outcome for ciphertext from a previous
    /// page load (private keys are ephemeral) and must render as a
    /// distinguishable "cannot decrypt" state, not a hard error.
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Which step rejected the input.
        reason: String,
    },
}
