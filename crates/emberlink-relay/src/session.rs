//! Per-session relay state and admission logic.
//!
//! [`SessionState`] is the authoritative aggregate for one session: mode,
//! auth secret, membership, public-key roster, message log, and the group
//! key distribution. All mutation happens through methods called from a
//! single driver event handler, so no internal locking is needed.
//!
//! The mode is a tagged union ([`ModeState`]) so mode-specific invariants
//! live in the type: only group sessions carry a key distribution, only
//! password sessions carry a password hash.

use std::collections::HashMap;

use emberlink_proto::{
    ChatMode, Credential, JoinRequest, MessageRecord, PublicKeyEntry, UserId,
};

use crate::error::AdmissionError;

/// One registered member of a session.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    /// Connection handle currently routing to this member. Replaced in
    /// place on reconnect; never duplicated.
    pub connection: u64,
    /// Display name, UI only.
    pub display_name: Option<String>,
    /// When the member first joined, wall-clock milliseconds.
    pub joined_at_ms: u64,
}

/// Mode-specific session state.
#[derive(Debug, Clone)]
pub enum ModeState {
    /// Shared-key broadcast. Carries the creator's latest wrapped-key
    /// distribution, replaced wholesale on every key event.
    Group {
        /// Member id to that member's wrapped session key.
        key_distribution: HashMap<UserId, String>,
    },
    /// Per-recipient hybrid encryption, capped at two members.
    Private,
    /// Private mode gated by a password.
    Password {
        /// Base64 hash of the room password, fixed at reservation.
        password_hash: String,
    },
}

impl ModeState {
    /// The wire-level mode tag.
    pub fn mode(&self) -> ChatMode {
        match self {
            Self::Group { .. } => ChatMode::Group,
            Self::Private => ChatMode::Private,
            Self::Password { .. } => ChatMode::Password,
        }
    }
}

/// Outcome of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First-time join; announce `user-joined` to the rest of the session.
    Joined,
    /// Same user id on a new connection; handle replaced, no announcement.
    Reconnected,
}

/// Authoritative state of one session.
///
/// Generic over `I` (instant type) so eviction logic runs under virtual
/// time in tests.
#[derive(Debug, Clone)]
pub struct SessionState<I> {
    mode: ModeState,
    /// Shared secret gating non-creator joins. Set at reservation, or by
    /// the creator's first join on the lazy-creation path.
    auth_secret: Option<String>,
    /// True between reservation and the creator's join; admits nobody else.
    reserved: bool,
    members: HashMap<UserId, MemberInfo>,
    public_keys: HashMap<UserId, PublicKeyEntry>,
    /// Append-only, first copy per message id. Replayed (filtered) to
    /// joiners; never persisted anywhere.
    messages: Vec<MessageRecord>,
    last_activity: I,
}

impl<I: Copy> SessionState<I> {
    /// A freshly reserved session: no members, creator not yet joined.
    pub fn reserved(mode: ModeState, auth_secret: String, now: I) -> Self {
        Self {
            mode,
            auth_secret: Some(auth_secret),
            reserved: true,
            members: HashMap::new(),
            public_keys: HashMap::new(),
            messages: Vec::new(),
            last_activity: now,
        }
    }

    /// An unreserved session created lazily by a creator's join (legacy
    /// path). Group mode, active immediately; the join's credential becomes
    /// the auth secret.
    pub fn lazily_created(now: I) -> Self {
        Self {
            mode: ModeState::Group { key_distribution: HashMap::new() },
            auth_secret: None,
            reserved: false,
            members: HashMap::new(),
            public_keys: HashMap::new(),
            messages: Vec::new(),
            last_activity: now,
        }
    }

    /// The session's mode tag.
    pub fn mode(&self) -> ChatMode {
        self.mode.mode()
    }

    /// Whether the creator has not joined yet.
    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    /// Record activity for idle-eviction bookkeeping.
    pub fn touch(&mut self, now: I) {
        self.last_activity = now;
    }

    /// Last recorded activity.
    pub fn last_activity(&self) -> I {
        self.last_activity
    }

    /// Current member count (distinct user ids).
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether the session has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Run the join handshake's admission checks and, on success, register
    /// or update the membership and roster entries.
    ///
    /// Check order matches the protocol: creator secret (idempotent set),
    /// reservation gate, credential validation, capacity. The capacity
    /// check runs against whether this `userId` is already a member, so
    /// existing members always reconnect.
    pub fn admit(
        &mut self,
        request: &JoinRequest,
        connection: u64,
        now_ms: u64,
    ) -> Result<JoinOutcome, AdmissionError> {
        if request.is_creator {
            self.admit_creator(request)?;
        } else {
            self.admit_joiner(request)?;
        }

        let outcome = match self.members.get_mut(&request.user_id) {
            Some(member) => {
                member.connection = connection;
                if let Some(name) = &request.display_name {
                    member.display_name = Some(name.clone());
                }
                JoinOutcome::Reconnected
            },
            None => {
                self.members.insert(request.user_id.clone(), MemberInfo {
                    connection,
                    display_name: request.display_name.clone(),
                    joined_at_ms: now_ms,
                });
                JoinOutcome::Joined
            },
        };

        if let Some(public_key) = &request.public_key {
            self.store_public_key(
                request.user_id.clone(),
                public_key.clone(),
                request.display_name.clone(),
                now_ms,
            );
        }

        Ok(outcome)
    }

    /// Creator joins: confirm (or set) the auth secret, activate.
    fn admit_creator(&mut self, request: &JoinRequest) -> Result<(), AdmissionError> {
        let presented = request.credential.as_ref().and_then(Credential::secret);

        if let Some(stored) = self.auth_secret.as_deref() {
            if presented != Some(stored) {
                return Err(AdmissionError::InvalidKey);
            }
        } else if let Some(given) = presented {
            self.auth_secret = Some(given.to_string());
        }

        self.reserved = false;
        Ok(())
    }

    /// Non-creator joins: reservation gate, credential, capacity.
    fn admit_joiner(&self, request: &JoinRequest) -> Result<(), AdmissionError> {
        if self.reserved {
            return Err(AdmissionError::SessionNotActive);
        }

        if let Some(stored_secret) = &self.auth_secret {
            match (&self.mode, &request.credential) {
                (
                    ModeState::Password { password_hash },
                    Some(Credential::PasswordHash(presented)),
                ) => {
                    if presented != password_hash {
                        return Err(AdmissionError::InvalidPassword);
                    }
                },
                (_, credential) => {
                    let presented = credential.as_ref().and_then(Credential::secret);
                    if presented != Some(stored_secret.as_str()) {
                        return Err(AdmissionError::InvalidKey);
                    }
                },
            }
        }

        if let Some(cap) = self.mode().member_cap() {
            if !self.members.contains_key(&request.user_id) && self.members.len() >= cap {
                return Err(AdmissionError::SessionFull);
            }
        }

        Ok(())
    }

    /// Store or replace a member's public key.
    pub fn store_public_key(
        &mut self,
        user_id: UserId,
        public_key: String,
        display_name: Option<String>,
        now_ms: u64,
    ) {
        self.public_keys.insert(user_id.clone(), PublicKeyEntry {
            user_id,
            public_key,
            display_name,
            joined_at_ms: now_ms,
        });
    }

    /// The full public-key roster, ordered by join time for stable output.
    pub fn roster(&self) -> Vec<PublicKeyEntry> {
        let mut entries: Vec<PublicKeyEntry> = self.public_keys.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.joined_at_ms.cmp(&b.joined_at_ms).then_with(|| a.user_id.cmp(&b.user_id))
        });
        entries
    }

    /// History replay for a joining user: broadcasts, messages addressed to
    /// them, and their own — with other senders' local-echo mirrors
    /// stripped. Ordered by relay timestamp.
    pub fn history_for(&self, user: &UserId) -> Vec<MessageRecord> {
        let mut history: Vec<MessageRecord> = self
            .messages
            .iter()
            .filter(|m| m.visible_to(user))
            .map(|m| m.for_recipient(user))
            .collect();
        history.sort_by_key(|m| m.timestamp_ms);
        history
    }

    /// Store the first-seen copy of a message. Returns `false` (and stores
    /// nothing) if a record with this id already exists — later
    /// per-recipient copies are routed but never stored or re-confirmed.
    pub fn store_message(&mut self, record: MessageRecord) -> bool {
        if self.messages.iter().any(|m| m.id == record.id) {
            return false;
        }
        self.messages.push(record);
        true
    }

    /// Replace the group key distribution. Returns `false` for non-group
    /// sessions, which carry no distribution by construction.
    pub fn set_key_distribution(&mut self, distribution: HashMap<UserId, String>) -> bool {
        match &mut self.mode {
            ModeState::Group { key_distribution } => {
                *key_distribution = distribution;
                true
            },
            ModeState::Private | ModeState::Password { .. } => false,
        }
    }

    /// This member's wrapped group session key, if distributed.
    pub fn wrapped_key_for(&self, user: &UserId) -> Option<String> {
        match &self.mode {
            ModeState::Group { key_distribution } => key_distribution.get(user).cloned(),
            ModeState::Private | ModeState::Password { .. } => None,
        }
    }

    /// A member's current connection handle.
    pub fn member_connection(&self, user: &UserId) -> Option<u64> {
        self.members.get(user).map(|m| m.connection)
    }

    /// A member's display name.
    pub fn member_display_name(&self, user: &UserId) -> Option<String> {
        self.members.get(user).and_then(|m| m.display_name.clone())
    }

    /// Connection handles of every member except `user`.
    pub fn connections_except(&self, user: &UserId) -> Vec<u64> {
        let mut connections: Vec<u64> = self
            .members
            .iter()
            .filter(|(id, _)| *id != user)
            .map(|(_, m)| m.connection)
            .collect();
        connections.sort_unstable();
        connections
    }

    /// Connection handles of every member.
    pub fn all_connections(&self) -> Vec<u64> {
        let mut connections: Vec<u64> = self.members.values().map(|m| m.connection).collect();
        connections.sort_unstable();
        connections
    }

    /// Remove a member and their public key. Returns the removed member.
    pub fn remove_member(&mut self, user: &UserId) -> Option<MemberInfo> {
        self.public_keys.remove(user);
        self.members.remove(user)
    }
}
