//! Relay error types.
//!
//! Two layers: [`AdmissionError`] for protocol-level rejections that travel
//! back to the client verbatim, and [`RelayError`] for driver-level failures.
//! An admission failure is terminal for the attempted operation but never
//! for the session or the relay process — the offending request is rejected,
//! everything else keeps running.

use emberlink_proto::SessionErrorCode;

use crate::store::StoreError;

/// Rejection of a reserve or join attempt.
///
/// Surfaced to the client as a `SessionError` push with the matching wire
/// code. Non-retriable without changing inputs (different code or password)
/// or waiting (creator not yet joined); clients must not retry
/// automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// Session does not exist.
    #[error("session not found")]
    SessionNotFound,

    /// Session is reserved and its creator has not joined yet.
    #[error("session not active")]
    SessionNotActive,

    /// Presented link secret does not match the session's.
    #[error("invalid authentication key")]
    InvalidKey,

    /// Presented password hash does not match the session's.
    #[error("invalid password")]
    InvalidPassword,

    /// Private/password session already has two distinct members.
    #[error("session full")]
    SessionFull,

    /// Reservation target already exists.
    #[error("session already exists")]
    SessionExists,
}

impl AdmissionError {
    /// The wire code pushed to the client.
    pub fn code(self) -> SessionErrorCode {
        match self {
            Self::SessionNotFound => SessionErrorCode::SessionNotFound,
            Self::SessionNotActive => SessionErrorCode::SessionNotActive,
            Self::InvalidKey => SessionErrorCode::InvalidKey,
            Self::InvalidPassword => SessionErrorCode::InvalidPassword,
            Self::SessionFull => SessionErrorCode::SessionFull,
            Self::SessionExists => SessionErrorCode::SessionExists,
        }
    }

    /// The human-readable message pushed alongside the code.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::SessionNotFound => "Session not found. Please check the session link.",
            Self::SessionNotActive => {
                "Room not active yet. Please wait for the creator to join first."
            },
            Self::InvalidKey => {
                "Invalid authentication key. Please check your link and try again."
            },
            Self::InvalidPassword => "Incorrect password. Please check and try again.",
            Self::SessionFull => "This room is full. Only 2 members allowed.",
            Self::SessionExists => "Session already exists.",
        }
    }
}

/// Driver-level failures.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// An event referenced a connection the driver never accepted.
    ///
    /// May be transient if the connection was just torn down; the runtime
    /// should drop the event.
    #[error("unknown connection: {0}")]
    UnknownConnection(u64),

    /// Session store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors in the production runtime around the driver.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error (invalid bind address, missing TLS certs).
    /// Fatal at startup; fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error. May be transient (network issues) or fatal
    /// (bind address in use).
    #[error("transport error: {0}")]
    Transport(String),

    /// A client sent malformed data. Fatal for that connection only.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Driver error from event processing.
    #[error("driver error: {0}")]
    Driver(#[from] RelayError),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
