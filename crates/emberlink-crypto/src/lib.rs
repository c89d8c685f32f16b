//! Emberlink Cryptographic Primitives
//!
//! Cryptographic building blocks for Emberlink sessions. Pure functions with
//! deterministic outputs. Callers provide the RNG, which enables
//! deterministic testing and keeps protocol state machines free of entropy
//! sources.
//!
//! # Key Lifecycle
//!
//! Every participant generates a fresh 2048-bit RSA-OAEP identity key pair
//! when its chat session starts, and the private key lives exactly as long
//! as that session — nothing is ever persisted. Payload encryption is always
//! AES-256-GCM; the difference between modes is how the symmetric key is
//! managed:
//!
//! ```text
//! Identity Key Pair (RSA-OAEP, per participant, per page load)
//!        │
//!        ├── private/password: fresh AES key per message,
//!        │   wrapped per recipient            → hybrid envelope
//!        │
//!        └── group: one AES session key, minted by the creator,
//!            wrapped once per member          → nonce ‖ ciphertext
//! ```
//!
//! # Security
//!
//! Forward secrecy by ephemerality:
//! - Private keys are never written anywhere; closing or refreshing the page
//!   destroys them, so ciphertext from an earlier page load is undecryptable
//!   by design. [`CryptoError::DecryptionFailed`] on receive is therefore an
//!   expected, benign outcome — callers must render it as "cannot decrypt",
//!   not crash.
//!
//! Authenticity:
//! - AES-256-GCM provides tamper-evident encryption; a failed tag check
//!   rejects the message rather than yielding garbage
//! - RSA-OAEP (SHA-256) wraps symmetric keys; a wrong private key fails the
//!   unwrap cleanly
//!
//! Bounds:
//! - Direct RSA encryption is limited to the OAEP capacity of the modulus
//!   and is only used for bootstrap-sized payloads
//! - Hybrid payloads are capped at 20 MiB before any cryptography runs

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod group;
mod hybrid;
mod identity;

pub use error::CryptoError;
pub use group::{
    SESSION_KEY_BYTES, SessionKey, decrypt_message, encrypt_message, generate_session_key,
    unwrap_received, wrap_for_member,
};
pub use hybrid::{MAX_HYBRID_PAYLOAD_BYTES, open_envelope, seal_envelope};
pub use identity::{
    IdentityKeyPair, MAX_DIRECT_PAYLOAD_BYTES, decrypt_direct, encrypt_direct, export_public_key,
    generate_key_pair, import_public_key,
};
