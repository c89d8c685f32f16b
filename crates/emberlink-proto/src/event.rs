//! Request and push event vocabulary.
//!
//! [`ClientRequest`] is everything a client may send to the relay;
//! [`ServerPush`] is everything the relay may send back. Both serialize as
//! CBOR through the length-prefixed framing in this crate.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ident::{ChatMode, Credential, MessageId, SessionId, UserId};
use crate::message::{Destination, MessageKind, MessageRecord};

/// Join handshake input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Session to join.
    pub session_id: SessionId,
    /// Joining participant.
    pub user_id: UserId,
    /// Display name carried alongside messages, UI only.
    pub display_name: Option<String>,
    /// Exported public key. `None` on a rejoin where the relay already
    /// holds one.
    pub public_key: Option<String>,
    /// Whether this participant created (reserved) the session.
    pub is_creator: bool,
    /// Credential presented for admission.
    pub credential: Option<Credential>,
}

/// Everything a client may ask of the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientRequest {
    /// Reserve a session before the creator joins it.
    ReserveSession {
        /// Session to reserve.
        session_id: SessionId,
        /// Link secret that will gate non-creator joins.
        secret: String,
        /// Password hash for password mode, set at reservation.
        password_hash: Option<String>,
        /// Security model; immutable afterwards.
        mode: ChatMode,
    },
    /// Run the join handshake.
    JoinSession(JoinRequest),
    /// Register or replace a public key outside the join handshake.
    SavePublicKey {
        /// Target session.
        session_id: SessionId,
        /// Key owner.
        user_id: UserId,
        /// Exported public key.
        public_key: String,
        /// Display name to store with the key.
        display_name: Option<String>,
    },
    /// Ask for the current roster.
    GetPublicKeys {
        /// Target session.
        session_id: SessionId,
        /// Requester; their own key is omitted from the reply.
        user_id: UserId,
    },
    /// Creator publishes the wrapped group session key, one entry per member.
    SetSessionKey {
        /// Target session.
        session_id: SessionId,
        /// Member id to that member's wrapped key.
        wrapped_keys: HashMap<UserId, String>,
    },
    /// Send one (possibly per-recipient) encrypted message copy.
    SendMessage {
        /// Target session.
        session_id: SessionId,
        /// Author.
        from: UserId,
        /// Broadcast or one peer.
        to: Destination,
        /// Ciphertext blob.
        encrypted: String,
        /// Sender-local plaintext mirror; echoed back to the sender only.
        local_echo: Option<String>,
        /// Content category.
        kind: MessageKind,
        /// Sender-assigned dedup key, shared by all copies of one message.
        client_message_id: MessageId,
    },
    /// Leave a session explicitly.
    LeaveSession {
        /// Session to leave.
        session_id: SessionId,
        /// Leaving participant.
        user_id: UserId,
    },
    /// Typing indicator, relayed to everyone else.
    Typing {
        /// Target session.
        session_id: SessionId,
        /// Typist.
        user_id: UserId,
        /// Typist's display name.
        display_name: Option<String>,
    },
    /// End-of-typing indicator, relayed to everyone else.
    StoppedTyping {
        /// Target session.
        session_id: SessionId,
        /// Typist.
        user_id: UserId,
        /// Typist's display name.
        display_name: Option<String>,
    },
    /// Best-effort notification that a shared file was downloaded.
    FileDownloaded {
        /// Target session.
        session_id: SessionId,
        /// Display name of whoever downloaded.
        downloaded_by: String,
        /// Original sender to notify.
        sender_id: UserId,
        /// Name of the downloaded file.
        file_name: String,
    },
}

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyEntry {
    /// Key owner.
    pub user_id: UserId,
    /// Exported public key.
    pub public_key: String,
    /// Display name stored with the key.
    pub display_name: Option<String>,
    /// When the key was stored, wall-clock milliseconds.
    pub joined_at_ms: u64,
}

/// Admission failure codes, surfaced to clients verbatim.
///
/// Non-retriable without changing inputs or waiting; clients must not retry
/// automatically (repeated password guesses would leak).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionErrorCode {
    /// Session does not exist.
    SessionNotFound,
    /// Session is reserved and its creator has not joined yet.
    SessionNotActive,
    /// Presented link secret does not match.
    InvalidKey,
    /// Presented password hash does not match.
    InvalidPassword,
    /// Private/password session already has two distinct members.
    SessionFull,
    /// Reservation target already exists.
    SessionExists,
}

impl fmt::Display for SessionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionNotActive => "SESSION_NOT_ACTIVE",
            Self::InvalidKey => "INVALID_KEY",
            Self::InvalidPassword => "INVALID_PASSWORD",
            Self::SessionFull => "SESSION_FULL",
            Self::SessionExists => "SESSION_EXISTS",
        };
        f.write_str(code)
    }
}

/// Everything the relay may push to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerPush {
    /// Reservation succeeded.
    SessionReserved {
        /// Reserved session.
        session_id: SessionId,
        /// Mode recorded for it.
        mode: ChatMode,
    },
    /// An operation was rejected.
    SessionError {
        /// Machine-readable failure code.
        code: SessionErrorCode,
        /// Human-readable explanation.
        message: String,
    },
    /// History replay on join, already filtered for the receiving user.
    MessagesHistory(Vec<MessageRecord>),
    /// Session mode plus this user's wrapped group key, if any.
    SessionMetadata {
        /// The session's security model.
        mode: ChatMode,
        /// This member's wrapped group session key (group mode only).
        wrapped_session_key: Option<String>,
    },
    /// Full public-key roster after any key or membership change.
    PublicKeysUpdated(Vec<PublicKeyEntry>),
    /// This member's wrapped group session key after a (re)distribution.
    SessionKeyAvailable {
        /// Wrapped key addressed to the receiving member only.
        wrapped_session_key: String,
    },
    /// An encrypted message routed to this connection.
    NewMessage(MessageRecord),
    /// Send confirmation, echoed to the author once per message id.
    MessageSent(MessageRecord),
    /// A new participant joined.
    UserJoined {
        /// Who joined.
        user_id: UserId,
        /// Their display name.
        display_name: Option<String>,
        /// When, wall-clock milliseconds.
        timestamp_ms: u64,
    },
    /// A participant left or disconnected.
    UserLeft {
        /// Who left.
        user_id: UserId,
        /// Their display name, if known.
        display_name: Option<String>,
        /// When, wall-clock milliseconds.
        timestamp_ms: u64,
    },
    /// Someone started typing.
    UserTyping {
        /// Typist.
        user_id: UserId,
        /// Typist's display name.
        display_name: Option<String>,
    },
    /// Someone stopped typing.
    UserStoppedTyping {
        /// Typist.
        user_id: UserId,
        /// Typist's display name.
        display_name: Option<String>,
    },
    /// A recipient downloaded a file this client sent.
    DownloadNotification {
        /// Display name of the downloader.
        downloaded_by: String,
        /// Name of the downloaded file.
        file_name: String,
        /// When, wall-clock milliseconds.
        timestamp_ms: u64,
    },
}
