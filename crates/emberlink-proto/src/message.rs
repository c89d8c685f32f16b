//! Message records routed by the relay.

use serde::{Deserialize, Serialize};

use crate::ident::{MessageId, UserId};

/// Where a message is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Destination {
    /// Broadcast to every other session member (group mode).
    All,
    /// Unicast to one member (private/password mode fan-out).
    Peer(UserId),
}

/// Content category of a message, inferred by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain chat text.
    #[default]
    Text,
    /// Base64-embedded image blob.
    Image,
    /// Base64-embedded file blob.
    File,
    /// Base64-embedded video blob.
    Video,
    /// Base64-embedded audio blob.
    Audio,
}

/// One message as stored and routed by the relay.
///
/// The relay stores the first-seen copy per [`MessageId`] and routes every
/// copy; it never reads `encrypted`.
///
/// `local_echo` is the sender's own plaintext mirror. It exists so the
/// sender's UI can redisplay its own message without decrypting, is not
/// confidential by design, and must never be surfaced to anyone but its own
/// sender — history filtering and the send confirmation are the only paths
/// that return it to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Sender-assigned, collision-resistant dedup key.
    pub id: MessageId,
    /// Author of the message.
    pub from: UserId,
    /// Recipient (broadcast or one peer).
    pub to: Destination,
    /// Opaque ciphertext blob. Format depends on the session mode.
    pub encrypted: String,
    /// Sender-local plaintext mirror, for the sender's own redisplay only.
    pub local_echo: Option<String>,
    /// Content category.
    pub kind: MessageKind,
    /// Relay-assigned wall-clock milliseconds, used for ordering.
    pub timestamp_ms: u64,
    /// Display name of the sender at send time, for UI only.
    pub sender_display_name: Option<String>,
}

impl MessageRecord {
    /// Whether this record may appear in `user`'s history replay.
    ///
    /// A joining user receives only broadcasts, messages addressed to them,
    /// and messages they authored — private-mode ciphertext never leaks to
    /// an unintended recipient via history.
    pub fn visible_to(&self, user: &UserId) -> bool {
        match &self.to {
            Destination::All => true,
            Destination::Peer(peer) => peer == user || &self.from == user,
        }
    }

    /// The copy of this record that `user` may receive.
    ///
    /// The local-echo mirror is for its own sender's redisplay only; any
    /// copy routed or replayed to someone else has it stripped.
    pub fn for_recipient(&self, user: &UserId) -> Self {
        let mut copy = self.clone();
        if &copy.from != user {
            copy.local_echo = None;
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(from: &str, to: Destination) -> MessageRecord {
        MessageRecord {
            id: MessageId::new("m1"),
            from: UserId::new(from),
            to,
            encrypted: "blob".to_string(),
            local_echo: None,
            kind: MessageKind::Text,
            timestamp_ms: 0,
            sender_display_name: None,
        }
    }

    #[test]
    fn broadcast_is_visible_to_everyone() {
        let msg = record("alice", Destination::All);
        assert!(msg.visible_to(&UserId::new("bob")));
        assert!(msg.visible_to(&UserId::new("alice")));
    }

    #[test]
    fn unicast_is_visible_to_recipient_and_author_only() {
        let msg = record("alice", Destination::Peer(UserId::new("bob")));
        assert!(msg.visible_to(&UserId::new("bob")));
        assert!(msg.visible_to(&UserId::new("alice")));
        assert!(!msg.visible_to(&UserId::new("carol")));
    }

    #[test]
    fn local_echo_survives_only_for_its_author() {
        let mut msg = record("alice", Destination::All);
        msg.local_echo = Some("plaintext mirror".to_string());

        let for_author = msg.for_recipient(&UserId::new("alice"));
        assert_eq!(for_author.local_echo.as_deref(), Some("plaintext mirror"));

        let for_peer = msg.for_recipient(&UserId::new("bob"));
        assert_eq!(for_peer.local_echo, None);
    }
}
