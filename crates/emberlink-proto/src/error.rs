//! Protocol-level errors.

/// Errors from framing and boundary parsing.
///
/// All variants are terminal for the frame or string at hand, never for the
/// connection or session processing them.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A legacy locator string did not match any accepted form.
    #[error("malformed session locator: {reason}")]
    MalformedLocator {
        /// What was wrong with it. Never echoes the credential material.
        reason: String,
    },

    /// A frame body exceeds the wire limit.
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Claimed or actual body size.
        size: usize,
        /// The enforced limit.
        max: usize,
    },

    /// CBOR serialization failed.
    #[error("frame encoding failed: {0}")]
    Encode(String),

    /// CBOR deserialization failed.
    #[error("frame decoding failed: {0}")]
    Decode(String),
}
