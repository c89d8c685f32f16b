//! Length-prefixed CBOR framing.
//!
//! Wire layout per frame: `[length: u32 BE] + [CBOR body]`. The length
//! covers the body only. Decoding is incremental: a partial frame yields
//! `None` so the transport can keep reading.

use bytes::{Buf, BufMut};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ProtocolError;

/// Maximum frame body size.
///
/// The hybrid cipher caps payloads at 20 MiB post-encoding; one extra MiB
/// covers the envelope and record fields around the ciphertext.
pub const MAX_FRAME_BYTES: usize = 21 * 1024 * 1024;

/// Length prefix size in bytes.
const PREFIX_BYTES: usize = 4;

/// Encode a value as one frame into `dst`.
///
/// # Errors
///
/// - [`ProtocolError::FrameTooLarge`] if the CBOR body exceeds
///   [`MAX_FRAME_BYTES`]
/// - [`ProtocolError::Encode`] if CBOR serialization fails
pub fn encode_frame<T: Serialize>(value: &T, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
    let mut body = Vec::new();
    ciborium::into_writer(value, &mut body)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;

    if body.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge { size: body.len(), max: MAX_FRAME_BYTES });
    }

    dst.put_u32(body.len() as u32);
    dst.put_slice(&body);

    Ok(())
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` if `src` does not yet hold a complete frame, otherwise
/// the decoded value and the number of bytes consumed.
///
/// # Errors
///
/// - [`ProtocolError::FrameTooLarge`] if the prefix claims more than
///   [`MAX_FRAME_BYTES`] — reject before allocating
/// - [`ProtocolError::Decode`] if the body is not valid CBOR for `T`
pub fn decode_frame<T: DeserializeOwned>(
    src: &[u8],
) -> Result<Option<(T, usize)>, ProtocolError> {
    if src.len() < PREFIX_BYTES {
        return Ok(None);
    }

    let mut prefix = &src[..PREFIX_BYTES];
    let body_len = prefix.get_u32() as usize;

    if body_len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge { size: body_len, max: MAX_FRAME_BYTES });
    }

    let total = PREFIX_BYTES + body_len;
    if src.len() < total {
        return Ok(None);
    }

    let value = ciborium::from_reader(&src[PREFIX_BYTES..total])
        .map_err(|e| ProtocolError::Decode(e.to_string()))?;

    Ok(Some((value, total)))
}
