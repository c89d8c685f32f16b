//! Emberlink wire protocol.
//!
//! Defines everything both sides of the relay agree on: identifiers and
//! credentials, message records, the request/push event vocabulary, and the
//! length-prefixed CBOR framing used on the wire.
//!
//! The relay never inspects ciphertext. Every payload that crosses it is
//! either routing metadata (identifiers, modes, rosters) or an opaque
//! ciphertext blob produced by `emberlink-crypto` on a client.
//!
//! # Legacy locator strings
//!
//! Invite links carry a single `:`-delimited string (`session:secret`,
//! `session:secret:passwordhash`, `session:password:passwordhash`). That
//! format is parsed exactly once, at the client boundary, by
//! [`SessionLocator::parse`]; from there on only the tagged [`Credential`]
//! structure travels through the system.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod event;
mod ident;
mod message;

pub use codec::{MAX_FRAME_BYTES, decode_frame, encode_frame};
pub use error::ProtocolError;
pub use event::{ClientRequest, JoinRequest, PublicKeyEntry, ServerPush, SessionErrorCode};
pub use ident::{ChatMode, Credential, MessageId, SessionId, SessionLocator, UserId};
pub use message::{Destination, MessageKind, MessageRecord};
