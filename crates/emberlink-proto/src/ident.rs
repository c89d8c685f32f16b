//! Session and participant identifiers.
//!
//! All identifiers are opaque strings chosen by clients. A [`UserId`] is a
//! routing handle, not a verified identity; a [`SessionId`] names one
//! ephemeral session on the relay.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Opaque identifier of an ephemeral session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a raw session identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque, client-generated participant handle.
///
/// Stable for the lifetime of a browser profile, but carries no verified
/// identity. Uniqueness within a session is enforced by the relay's
/// membership map, not by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a raw user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sender-assigned message identifier, the relay's dedup key.
///
/// Assigned once by the sender and never changed by the relay, so the N
/// per-recipient copies of one logical message all share it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap a raw message identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Security model of a session. Immutable after reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Shared-key broadcast; unbounded membership.
    Group,
    /// Per-recipient hybrid encryption; two members at most.
    Private,
    /// Private mode gated by a shared password instead of a link secret.
    Password,
}

impl ChatMode {
    /// Maximum member count for this mode. `None` means unbounded.
    pub fn member_cap(self) -> Option<usize> {
        match self {
            Self::Group => None,
            Self::Private | Self::Password => Some(2),
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => f.write_str("group"),
            Self::Private => f.write_str("private"),
            Self::Password => f.write_str("password"),
        }
    }
}

/// Credential a participant presents when joining a session.
///
/// Tagged replacement for the legacy colon-delimited locator string. The
/// relay matches a [`Credential::Plain`] against the session's stored secret
/// and a [`Credential::PasswordHash`] against the password-hash component of
/// a password session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credential {
    /// Opaque link secret carried in the invite URL.
    Plain(String),
    /// Base64 password hash presented by a password-room joiner.
    PasswordHash(String),
    /// Link secret plus password hash, held only by a password-room creator.
    PlainWithPassword {
        /// The random link-secret component.
        secret: String,
        /// Base64 hash of the room password.
        password_hash: String,
    },
}

impl Credential {
    /// The plain secret component, if this credential carries one.
    pub fn secret(&self) -> Option<&str> {
        match self {
            Self::Plain(secret) | Self::PlainWithPassword { secret, .. } => Some(secret),
            Self::PasswordHash(_) => None,
        }
    }

    /// The password-hash component, if this credential carries one.
    pub fn password_hash(&self) -> Option<&str> {
        match self {
            Self::PasswordHash(hash) | Self::PlainWithPassword { password_hash: hash, .. } => {
                Some(hash)
            },
            Self::Plain(_) => None,
        }
    }
}

/// A session identifier plus the credential embedded in an invite link.
///
/// Produced by [`SessionLocator::parse`] from the legacy wire string. This is
/// the only place the colon format is interpreted; everything downstream
/// works with the tagged structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLocator {
    /// The bare session identifier.
    pub session_id: SessionId,
    /// Credential extracted from the locator, if any.
    pub credential: Option<Credential>,
}

impl SessionLocator {
    /// Parse a legacy `:`-delimited locator string.
    ///
    /// Accepted forms:
    /// - `session` — no credential
    /// - `session:secret` — plain link secret
    /// - `session:password:hash` — password-room joiner credential
    /// - `session:secret:hash` — password-room creator credential
    ///
    /// An empty credential segment is treated as absent, matching the
    /// original wire format where a trailing `:` carried no secret.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let mut parts = raw.splitn(4, ':');

        let session_id = match parts.next() {
            Some(id) if !id.is_empty() => SessionId::new(id),
            _ => {
                return Err(ProtocolError::MalformedLocator {
                    reason: "empty session identifier".to_string(),
                });
            },
        };

        let second = parts.next();
        let third = parts.next();

        if parts.next().is_some() {
            return Err(ProtocolError::MalformedLocator {
                reason: "too many segments".to_string(),
            });
        }

        let credential = match (second, third) {
            (None, _) | (Some(""), None) => None,
            (Some(secret), None) => Some(Credential::Plain(secret.to_string())),
            (Some("password"), Some(hash)) if !hash.is_empty() => {
                Some(Credential::PasswordHash(hash.to_string()))
            },
            (Some(secret), Some(hash)) if !secret.is_empty() && !hash.is_empty() => {
                Some(Credential::PlainWithPassword {
                    secret: secret.to_string(),
                    password_hash: hash.to_string(),
                })
            },
            _ => {
                return Err(ProtocolError::MalformedLocator {
                    reason: "empty credential segment".to_string(),
                });
            },
        };

        Ok(Self { session_id, credential })
    }
}
