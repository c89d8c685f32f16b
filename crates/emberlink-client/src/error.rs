//! Client error types.

use emberlink_crypto::CryptoError;

/// Errors from client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A cryptographic operation failed locally.
    ///
    /// `PayloadTooLarge` blocks the send before any network call;
    /// `DecryptionFailed` on receive never surfaces here — it becomes an
    /// undecryptable message marker instead.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A send was attempted before the join handshake completed.
    #[error("not joined to a session")]
    NotJoined,

    /// The session locator carries no credential to reserve or join with.
    #[error("locator carries no credential")]
    MissingCredential,
}
