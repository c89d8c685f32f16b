//! Client session state machine.
//!
//! [`SessionClient`] drives one participant's life in a session: identity
//! key generation, the join handshake, roster and mode tracking, cipher
//! selection per mode, group-key minting and distribution (creator only),
//! and decryption of inbound traffic. Sans-IO: the caller feeds
//! [`ClientEvent`]s and executes the returned [`ClientAction`]s.
//!
//! The identity key pair is generated at construction and lives exactly as
//! long as this value. Nothing is persisted, so dropping the client (page
//! refresh, leave) makes earlier private/password ciphertext permanently
//! undecryptable — that is the forward-secrecy property, not a bug, and
//! inbound messages that fail to decrypt are delivered as
//! [`MessageContent::Undecryptable`] rather than errors.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use emberlink_core::env::{EnvRng, Environment};
use emberlink_crypto::{
    CryptoError, IdentityKeyPair, MAX_HYBRID_PAYLOAD_BYTES, SessionKey, decrypt_message,
    encrypt_message, export_public_key, generate_key_pair, generate_session_key,
    import_public_key, open_envelope, seal_envelope, unwrap_received, wrap_for_member,
};
use emberlink_proto::{
    ChatMode, ClientRequest, Destination, JoinRequest, MessageId, MessageKind, MessageRecord,
    PublicKeyEntry, ServerPush, SessionId, SessionLocator, UserId,
};

use crate::error::ClientError;
use crate::event::{ClientAction, ClientEvent, MessageContent};

/// Default bounded wait for the join handshake.
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Parsed session locator (identifier plus credential).
    pub locator: SessionLocator,
    /// This participant's routing handle.
    pub user_id: UserId,
    /// Display name carried alongside messages.
    pub display_name: Option<String>,
    /// Whether this participant reserved the session.
    pub is_creator: bool,
    /// Expected mode, used for reservation and until the relay's metadata
    /// confirms the authoritative one.
    pub mode: ChatMode,
    /// Bounded wait for a session-error vs. success reply after joining.
    pub join_timeout: Duration,
}

impl ClientConfig {
    /// Configuration with defaults: joiner role, group mode, 5 s timeout.
    pub fn new(locator: SessionLocator, user_id: UserId) -> Self {
        Self {
            locator,
            user_id,
            display_name: None,
            is_creator: false,
            mode: ChatMode::Group,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}

/// Where the client is in its session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase<I> {
    /// Not joined; nothing in flight.
    Idle,
    /// Join emitted, waiting for the relay's verdict.
    Joining {
        /// When the join was emitted.
        since: I,
    },
    /// Admitted; sends are allowed.
    Active,
    /// Left; terminal until the caller builds a fresh client.
    Left,
}

/// A peer's roster entry as the client tracks it.
#[derive(Debug, Clone)]
struct PeerInfo {
    public_key: String,
    #[allow(dead_code)]
    display_name: Option<String>,
}

/// One participant's session state machine.
pub struct SessionClient<E: Environment> {
    env: E,
    config: ClientConfig,
    identity: IdentityKeyPair,
    exported_public_key: String,
    phase: Phase<E::Instant>,
    /// Authoritative mode once the relay's metadata arrives.
    mode: Option<ChatMode>,
    /// Peer roster, own entry excluded. Ordered for deterministic fan-out.
    peers: BTreeMap<UserId, PeerInfo>,
    /// Group session key, unwrapped or (creator) minted.
    session_key: Option<SessionKey>,
    /// Member set of the last key distribution we pushed (creator only).
    last_distribution: Option<BTreeSet<UserId>>,
    /// Plaintext sends buffered until the session is send-ready.
    outbox: Vec<String>,
    /// Message ids already delivered; dedup across history, routed copies,
    /// and confirmations.
    seen: HashSet<MessageId>,
}

impl<E: Environment> SessionClient<E> {
    /// Create a client and generate its ephemeral identity key pair.
    pub fn new(env: E, config: ClientConfig) -> Result<Self, ClientError> {
        let mut rng = EnvRng::new(env.clone());
        let identity = generate_key_pair(&mut rng)?;
        let exported_public_key = export_public_key(&identity.public)?;

        Ok(Self {
            env,
            config,
            identity,
            exported_public_key,
            phase: Phase::Idle,
            mode: None,
            peers: BTreeMap::new(),
            session_key: None,
            last_distribution: None,
            outbox: Vec::new(),
            seen: HashSet::new(),
        })
    }

    /// This participant's user id.
    pub fn user_id(&self) -> &UserId {
        &self.config.user_id
    }

    /// The session this client targets.
    pub fn session_id(&self) -> &SessionId {
        &self.config.locator.session_id
    }

    /// The exported public key announced to the relay.
    pub fn public_key_export(&self) -> &str {
        &self.exported_public_key
    }

    /// The mode in effect (relay metadata wins over the configured one).
    pub fn current_mode(&self) -> ChatMode {
        self.mode.unwrap_or(self.config.mode)
    }

    /// Whether the join handshake has completed.
    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Active)
    }

    /// Whether group traffic can be encrypted and decrypted right now.
    pub fn is_session_key_ready(&self) -> bool {
        self.session_key.is_some()
    }

    /// Number of known peers (own entry excluded).
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of sends buffered while the session is not send-ready.
    pub fn pending_send_count(&self) -> usize {
        self.outbox.len()
    }

    /// Process an event and return resulting actions.
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::Connected => Ok(self.handle_connected()),
            ClientEvent::Reserve => self.handle_reserve(),
            ClientEvent::PushReceived(push) => Ok(self.handle_push(push)),
            ClientEvent::SendText { content } => self.handle_send_text(content),
            ClientEvent::Leave => Ok(self.handle_leave()),
            ClientEvent::Tick { now } => Ok(self.handle_tick(now)),
        }
    }

    fn handle_connected(&mut self) -> Vec<ClientAction> {
        if matches!(self.phase, Phase::Left) {
            // The user left; a reconnect must not silently rejoin.
            return vec![ClientAction::Log {
                message: "connected after leave, not rejoining".to_string(),
            }];
        }

        self.phase = Phase::Joining { since: self.env.now() };

        vec![ClientAction::SendRequest(ClientRequest::JoinSession(JoinRequest {
            session_id: self.config.locator.session_id.clone(),
            user_id: self.config.user_id.clone(),
            display_name: self.config.display_name.clone(),
            public_key: Some(self.exported_public_key.clone()),
            is_creator: self.config.is_creator,
            credential: self.config.locator.credential.clone(),
        }))]
    }

    fn handle_reserve(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        let credential =
            self.config.locator.credential.as_ref().ok_or(ClientError::MissingCredential)?;
        let secret = credential.secret().ok_or(ClientError::MissingCredential)?.to_string();

        Ok(vec![ClientAction::SendRequest(ClientRequest::ReserveSession {
            session_id: self.config.locator.session_id.clone(),
            secret,
            password_hash: credential.password_hash().map(str::to_string),
            mode: self.config.mode,
        })])
    }

    fn handle_push(&mut self, push: ServerPush) -> Vec<ClientAction> {
        match push {
            ServerPush::SessionReserved { session_id, mode } => vec![ClientAction::Log {
                message: format!("session {session_id} reserved (mode: {mode})"),
            }],

            ServerPush::SessionError { code, message } => {
                if matches!(self.phase, Phase::Joining { .. }) {
                    self.phase = Phase::Idle;
                }
                vec![ClientAction::SessionError { code, message }]
            },

            ServerPush::SessionMetadata { mode, wrapped_session_key } => {
                self.mode = Some(mode);
                self.phase = Phase::Active;

                let mut actions = Vec::new();
                if let Some(wrapped) = wrapped_session_key {
                    actions.extend(self.accept_wrapped_key(&wrapped));
                }
                actions
            },

            ServerPush::SessionKeyAvailable { wrapped_session_key } => {
                self.accept_wrapped_key(&wrapped_session_key)
            },

            ServerPush::PublicKeysUpdated(roster) => self.handle_roster(roster),

            ServerPush::MessagesHistory(mut messages) => {
                messages.sort_by_key(|m| m.timestamp_ms);
                messages.into_iter().filter_map(|m| self.deliver(m)).collect()
            },

            ServerPush::NewMessage(record) | ServerPush::MessageSent(record) => {
                self.deliver(record).into_iter().collect()
            },

            ServerPush::UserJoined { user_id, display_name, .. } => vec![
                ClientAction::PeerJoined { user_id, display_name },
                // Re-request the roster so every existing member holds the
                // newcomer's key before encrypting to the session.
                ClientAction::SendRequest(ClientRequest::GetPublicKeys {
                    session_id: self.config.locator.session_id.clone(),
                    user_id: self.config.user_id.clone(),
                }),
            ],

            ServerPush::UserLeft { user_id, display_name, .. } => {
                self.peers.remove(&user_id);
                vec![ClientAction::PeerLeft { user_id, display_name }]
            },

            ServerPush::UserTyping { user_id, display_name } => {
                vec![ClientAction::PeerTyping { user_id, display_name, typing: true }]
            },
            ServerPush::UserStoppedTyping { user_id, display_name } => {
                vec![ClientAction::PeerTyping { user_id, display_name, typing: false }]
            },

            ServerPush::DownloadNotification { downloaded_by, file_name, .. } => {
                vec![ClientAction::DownloadNotified { downloaded_by, file_name }]
            },
        }
    }

    /// Unwrap a distributed session key with our private key.
    ///
    /// Failure is benign: the distribution may predate our current key pair
    /// (rejoin after refresh); a fresh one follows once the creator sees
    /// the roster change.
    fn accept_wrapped_key(&mut self, wrapped: &str) -> Vec<ClientAction> {
        match unwrap_received(wrapped, &self.identity.private) {
            Ok(key) => {
                self.session_key = Some(key);
                let mut actions = vec![ClientAction::Log {
                    message: "group session key ready".to_string(),
                }];
                actions.extend(self.flush_outbox());
                actions
            },
            Err(e) => vec![ClientAction::Log {
                message: format!("wrapped session key not for this key pair: {e}"),
            }],
        }
    }

    fn handle_roster(&mut self, roster: Vec<PublicKeyEntry>) -> Vec<ClientAction> {
        self.peers = roster
            .iter()
            .filter(|entry| entry.user_id != self.config.user_id)
            .map(|entry| {
                (entry.user_id.clone(), PeerInfo {
                    public_key: entry.public_key.clone(),
                    display_name: entry.display_name.clone(),
                })
            })
            .collect();

        let mut actions = Vec::new();

        if self.config.is_creator && self.current_mode() == ChatMode::Group {
            actions.extend(self.distribute_session_key());
        }

        if self.is_send_ready() {
            actions.extend(self.flush_outbox());
        }

        actions
    }

    /// Creator only: (re)distribute the session key whenever the member set
    /// changed since the last push. The key itself is minted once and
    /// re-wrapped for every known member including ourselves; a concurrent
    /// stale distribution being replaced by this one is fine (last write
    /// wins).
    fn distribute_session_key(&mut self) -> Vec<ClientAction> {
        let mut targets: BTreeSet<UserId> = self.peers.keys().cloned().collect();
        targets.insert(self.config.user_id.clone());

        if self.last_distribution.as_ref() == Some(&targets) {
            return Vec::new();
        }

        let mut rng = EnvRng::new(self.env.clone());

        let key = match &self.session_key {
            Some(key) => key.clone(),
            None => {
                let key = generate_session_key(&mut rng);
                self.session_key = Some(key.clone());
                key
            },
        };

        let mut entries: Vec<(UserId, String)> = self
            .peers
            .iter()
            .map(|(user_id, peer)| (user_id.clone(), peer.public_key.clone()))
            .collect();
        entries.push((self.config.user_id.clone(), self.exported_public_key.clone()));

        let mut wrapped_keys = HashMap::new();
        let mut actions = Vec::new();

        for (user_id, public_key) in entries {
            let wrapped = import_public_key(&public_key)
                .and_then(|member_key| wrap_for_member(&mut rng, &key, &member_key));
            match wrapped {
                Ok(wrapped) => {
                    wrapped_keys.insert(user_id, wrapped);
                },
                Err(e) => actions.push(ClientAction::Log {
                    message: format!("cannot wrap session key for {user_id}: {e}"),
                }),
            }
        }

        if !wrapped_keys.is_empty() {
            self.last_distribution = Some(targets);
            actions.push(ClientAction::SendRequest(ClientRequest::SetSessionKey {
                session_id: self.config.locator.session_id.clone(),
                wrapped_keys,
            }));
        }

        actions
    }

    fn handle_send_text(&mut self, content: String) -> Result<Vec<ClientAction>, ClientError> {
        if !matches!(self.phase, Phase::Active) {
            return Err(ClientError::NotJoined);
        }

        // Enforced before any crypto or network work; the caller informs
        // the user instead of truncating.
        if content.len() > MAX_HYBRID_PAYLOAD_BYTES {
            return Err(ClientError::Crypto(CryptoError::PayloadTooLarge {
                size: content.len(),
                max: MAX_HYBRID_PAYLOAD_BYTES,
            }));
        }

        Ok(self.encrypt_and_send(content))
    }

    /// Encrypt one user message along the current mode's path, or buffer it
    /// if the session is not send-ready yet.
    fn encrypt_and_send(&mut self, content: String) -> Vec<ClientAction> {
        match self.current_mode() {
            ChatMode::Group => {
                let Some(key) = self.session_key.clone() else {
                    self.outbox.push(content);
                    return vec![ClientAction::Log {
                        message: "send buffered until the session key is ready".to_string(),
                    }];
                };

                let mut rng = EnvRng::new(self.env.clone());
                let encrypted = encrypt_message(&mut rng, content.as_bytes(), &key);

                vec![ClientAction::SendRequest(ClientRequest::SendMessage {
                    session_id: self.config.locator.session_id.clone(),
                    from: self.config.user_id.clone(),
                    to: Destination::All,
                    encrypted,
                    local_echo: Some(content.clone()),
                    kind: infer_kind(&content),
                    client_message_id: self.next_message_id(),
                })]
            },

            ChatMode::Private | ChatMode::Password => {
                if self.peers.is_empty() {
                    self.outbox.push(content);
                    return vec![ClientAction::Log {
                        message: "send buffered until a peer key is known".to_string(),
                    }];
                }

                // One logical message, N envelopes, one shared id.
                let message_id = self.next_message_id();
                let kind = infer_kind(&content);
                let mut rng = EnvRng::new(self.env.clone());
                let mut actions = Vec::new();

                for (peer_id, peer) in &self.peers {
                    let sealed = import_public_key(&peer.public_key)
                        .and_then(|peer_key| seal_envelope(&mut rng, content.as_bytes(), &peer_key));

                    match sealed {
                        Ok(encrypted) => {
                            actions.push(ClientAction::SendRequest(ClientRequest::SendMessage {
                                session_id: self.config.locator.session_id.clone(),
                                from: self.config.user_id.clone(),
                                to: Destination::Peer(peer_id.clone()),
                                encrypted,
                                local_echo: Some(content.clone()),
                                kind,
                                client_message_id: message_id.clone(),
                            }));
                        },
                        Err(e) => actions.push(ClientAction::Log {
                            message: format!("skipping peer {peer_id}: {e}"),
                        }),
                    }
                }

                actions
            },
        }
    }

    /// Re-run buffered sends now that the session became send-ready.
    fn flush_outbox(&mut self) -> Vec<ClientAction> {
        if self.outbox.is_empty() {
            return Vec::new();
        }

        let pending = std::mem::take(&mut self.outbox);
        let mut actions = Vec::new();
        for content in pending {
            actions.extend(self.encrypt_and_send(content));
        }
        actions
    }

    fn is_send_ready(&self) -> bool {
        match self.current_mode() {
            ChatMode::Group => self.session_key.is_some(),
            ChatMode::Private | ChatMode::Password => !self.peers.is_empty(),
        }
    }

    /// Deliver one message record to the application, at most once per id.
    fn deliver(&mut self, record: MessageRecord) -> Option<ClientAction> {
        if !self.seen.insert(record.id.clone()) {
            return None;
        }

        let content = if record.from == self.config.user_id {
            // Local echo: our own UI redisplays our own plaintext without a
            // decrypt round (our copy may be encrypted to someone else).
            match &record.local_echo {
                Some(echo) => MessageContent::Plaintext(echo.clone()),
                None => self.decrypt_record(&record),
            }
        } else {
            self.decrypt_record(&record)
        };

        Some(ClientAction::DeliverMessage {
            id: record.id,
            from: record.from,
            sender_display_name: record.sender_display_name,
            content,
            kind: record.kind,
            timestamp_ms: record.timestamp_ms,
        })
    }

    /// Decrypt along the current mode's path. Every failure becomes the
    /// undecryptable marker; the message list must keep rendering.
    fn decrypt_record(&self, record: &MessageRecord) -> MessageContent {
        let plaintext = match self.current_mode() {
            ChatMode::Group => match &self.session_key {
                Some(key) => decrypt_message(&record.encrypted, key),
                None => return MessageContent::Undecryptable,
            },
            ChatMode::Private | ChatMode::Password => {
                open_envelope(&record.encrypted, &self.identity.private)
            },
        };

        match plaintext.ok().and_then(|bytes| String::from_utf8(bytes).ok()) {
            Some(text) => MessageContent::Plaintext(text),
            None => MessageContent::Undecryptable,
        }
    }

    fn handle_leave(&mut self) -> Vec<ClientAction> {
        if matches!(self.phase, Phase::Left) {
            return Vec::new();
        }

        self.phase = Phase::Left;
        self.session_key = None;
        self.peers.clear();
        self.outbox.clear();
        self.last_distribution = None;

        vec![ClientAction::SendRequest(ClientRequest::LeaveSession {
            session_id: self.config.locator.session_id.clone(),
            user_id: self.config.user_id.clone(),
        })]
    }

    fn handle_tick(&mut self, now: E::Instant) -> Vec<ClientAction> {
        if let Phase::Joining { since } = self.phase {
            if now - since > self.config.join_timeout {
                self.phase = Phase::Idle;
                return vec![ClientAction::JoinTimedOut];
            }
        }
        Vec::new()
    }

    fn next_message_id(&self) -> MessageId {
        MessageId::new(format!(
            "msg-{}-{:08x}",
            self.env.wall_clock_millis(),
            self.env.random_u64() as u32
        ))
    }
}

impl<E: Environment> std::fmt::Debug for SessionClient<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("user_id", &self.config.user_id)
            .field("session_id", &self.config.locator.session_id)
            .field("mode", &self.current_mode())
            .field("peer_count", &self.peers.len())
            .field("session_key_ready", &self.session_key.is_some())
            .finish()
    }
}

/// Classify content by the blob prefixes the UI embeds.
fn infer_kind(content: &str) -> MessageKind {
    if content.starts_with("[IMAGE]") {
        MessageKind::Image
    } else if content.starts_with("[FILE]") {
        MessageKind::File
    } else {
        MessageKind::Text
    }
}
