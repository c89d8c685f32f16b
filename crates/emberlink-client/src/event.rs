//! Client events and actions.

use emberlink_proto::{
    ClientRequest, MessageId, MessageKind, SessionErrorCode, UserId,
};

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Receiving pushes from the relay transport
/// - Driving time forward via ticks
/// - Forwarding user intents (send, leave)
///
/// Generic over `I` (instant type) to support both production and
/// deterministic test environments.
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// Transport connected (or reconnected). Triggers the join handshake;
    /// on a reconnect the same credentials are presented again and the
    /// relay's replies refresh the roster and group key.
    Connected,

    /// Ask the relay to reserve the session before joining it.
    Reserve,

    /// A push arrived from the relay.
    PushReceived(emberlink_proto::ServerPush),

    /// User wants to send a message.
    ///
    /// Content with an `[IMAGE]` or `[FILE]` prefix is classified as a
    /// blob message; everything else is text.
    SendText {
        /// The plaintext (or base64-blob) content.
        content: String,
    },

    /// User leaves the session. Idempotent; discards all key material.
    Leave,

    /// Time tick for timeout processing.
    Tick {
        /// Current time from the environment.
        now: I,
    },
}

/// Decrypted (or undecryptable) message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Successfully decrypted plaintext.
    Plaintext(String),
    /// Decryption failed — expected for ciphertext from a previous page
    /// load, since private keys are never persisted. Render as a "cannot
    /// decrypt" state, never as a hard error.
    Undecryptable,
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone)]
pub enum ClientAction {
    /// Send a request to the relay.
    SendRequest(ClientRequest),

    /// Deliver a message to the application layer.
    DeliverMessage {
        /// Sender-assigned message id.
        id: MessageId,
        /// Author.
        from: UserId,
        /// Author's display name at send time, if known.
        sender_display_name: Option<String>,
        /// Decrypted content, or the benign undecryptable marker.
        content: MessageContent,
        /// Content category.
        kind: MessageKind,
        /// Relay-assigned timestamp, for ordering.
        timestamp_ms: u64,
    },

    /// The relay rejected an operation. Not retried automatically;
    /// retries are user-initiated only.
    SessionError {
        /// Machine-readable failure code.
        code: SessionErrorCode,
        /// Human-readable explanation from the relay.
        message: String,
    },

    /// The join handshake exceeded its bounded wait.
    JoinTimedOut,

    /// A peer joined the session.
    PeerJoined {
        /// Who joined.
        user_id: UserId,
        /// Their display name.
        display_name: Option<String>,
    },

    /// A peer left or disconnected.
    PeerLeft {
        /// Who left.
        user_id: UserId,
        /// Their display name, if known.
        display_name: Option<String>,
    },

    /// A peer's typing state changed.
    PeerTyping {
        /// The typist.
        user_id: UserId,
        /// Their display name.
        display_name: Option<String>,
        /// `true` on typing, `false` on stopped.
        typing: bool,
    },

    /// A recipient downloaded a file this client sent.
    DownloadNotified {
        /// Display name of the downloader.
        downloaded_by: String,
        /// Name of the downloaded file.
        file_name: String,
    },

    /// Log message for debugging.
    Log {
        /// Message text.
        message: String,
    },
}
