//! Relay driver.
//!
//! Sans-IO event→actions state machine for the relay: admission control,
//! membership bookkeeping, message dedup and routing, key-distribution
//! fan-out, and idle eviction. The runtime (production QUIC glue or a test
//! harness) feeds [`RelayEvent`]s in and executes the returned
//! [`RelayAction`]s; the driver itself performs no I/O and never decrypts a
//! payload.
//!
//! Each event is handled to completion before the next is dequeued, so all
//! mutation of a given session is serialized without explicit locking.

use std::collections::HashMap;
use std::time::Duration;

use emberlink_core::env::Environment;
use emberlink_proto::{
    ChatMode, ClientRequest, Destination, JoinRequest, MessageRecord, PublicKeyEntry,
    ServerPush, SessionId, UserId,
};

use crate::error::{AdmissionError, RelayError};
use crate::registry::ConnectionRegistry;
use crate::session::{JoinOutcome, ModeState, SessionState};
use crate::store::{SessionStore, StoreError};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// How long an empty session survives before the sweep reclaims it.
    pub empty_session_grace: Duration,
    /// Idle window after which a session is reclaimed even with members
    /// (abandoned sockets, relay restarts on the client side).
    pub orphan_window: Duration,
    /// Cadence at which the runtime should emit [`RelayEvent::Tick`].
    pub sweep_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            empty_session_grace: Duration::from_secs(30 * 60),
            orphan_window: Duration::from_secs(2 * 60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Events the relay driver processes.
///
/// Produced by the external runtime (production transport or tests).
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A new connection was accepted.
    ConnectionAccepted {
        /// Unique connection id assigned by the runtime.
        connection: u64,
    },

    /// A request arrived from a connection.
    RequestReceived {
        /// Connection that sent it.
        connection: u64,
        /// The decoded request.
        request: ClientRequest,
    },

    /// A connection was closed (by peer or error).
    ConnectionClosed {
        /// Connection that closed.
        connection: u64,
        /// Reason for closure.
        reason: String,
    },

    /// Periodic tick driving the eviction sweep.
    Tick,
}

/// Actions the relay driver produces.
///
/// Executed by runtime-specific code.
#[derive(Debug, Clone)]
pub enum RelayAction {
    /// Send a push to one connection.
    Send {
        /// Target connection.
        connection: u64,
        /// Push to deliver.
        push: ServerPush,
    },

    /// Close a connection.
    Close {
        /// Connection to close.
        connection: u64,
        /// Reason for closure.
        reason: String,
    },

    /// Log a message.
    Log {
        /// Severity.
        level: LogLevel,
        /// Message text.
        message: String,
    },
}

/// Log levels for relay actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational message.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

/// Data gathered inside one admission update, used to build reply actions.
struct JoinSnapshot {
    outcome: JoinOutcome,
    mode: ChatMode,
    wrapped_session_key: Option<String>,
    history: Vec<MessageRecord>,
    roster: Vec<PublicKeyEntry>,
    peer_connections: Vec<u64>,
    all_connections: Vec<u64>,
}

/// Action-based relay driver.
pub struct RelayDriver<E, S>
where
    E: Environment,
    S: SessionStore<E::Instant>,
{
    registry: ConnectionRegistry,
    store: S,
    env: E,
    config: RelayConfig,
}

impl<E, S> RelayDriver<E, S>
where
    E: Environment,
    S: SessionStore<E::Instant>,
{
    /// Create a new relay driver.
    pub fn new(env: E, store: S, config: RelayConfig) -> Self {
        Self { registry: ConnectionRegistry::new(), store, env, config }
    }

    /// Process one event and return the actions to execute.
    pub fn process_event(&mut self, event: RelayEvent) -> Result<Vec<RelayAction>, RelayError> {
        match event {
            RelayEvent::ConnectionAccepted { connection } => {
                Ok(self.handle_connection_accepted(connection))
            },
            RelayEvent::RequestReceived { connection, request } => {
                if !self.registry.contains(connection) {
                    return Err(RelayError::UnknownConnection(connection));
                }
                Ok(self.handle_request(connection, request))
            },
            RelayEvent::ConnectionClosed { connection, reason } => {
                Ok(self.handle_connection_closed(connection, &reason))
            },
            RelayEvent::Tick => Ok(self.handle_tick()),
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    /// Whether a session exists.
    pub fn has_session(&self, session_id: &SessionId) -> bool {
        self.store.contains(session_id)
    }

    /// The session store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn handle_connection_accepted(&mut self, connection: u64) -> Vec<RelayAction> {
        if self.registry.connection_count() >= self.config.max_connections {
            return vec![RelayAction::Close {
                connection,
                reason: "max connections exceeded".to_string(),
            }];
        }

        self.registry.register(connection);

        vec![RelayAction::Log {
            level: LogLevel::Debug,
            message: format!("connection {connection} accepted"),
        }]
    }

    fn handle_request(&mut self, connection: u64, request: ClientRequest) -> Vec<RelayAction> {
        match request {
            ClientRequest::ReserveSession { session_id, secret, password_hash, mode } => {
                self.handle_reserve(connection, session_id, secret, password_hash, mode)
            },
            ClientRequest::JoinSession(join) => self.handle_join(connection, &join),
            ClientRequest::SavePublicKey { session_id, user_id, public_key, display_name } => {
                self.handle_save_public_key(session_id, user_id, public_key, display_name)
            },
            ClientRequest::GetPublicKeys { session_id, user_id } => {
                self.handle_get_public_keys(connection, &session_id, &user_id)
            },
            ClientRequest::SetSessionKey { session_id, wrapped_keys } => {
                self.handle_set_session_key(&session_id, wrapped_keys)
            },
            ClientRequest::SendMessage {
                session_id,
                from,
                to,
                encrypted,
                local_echo,
                kind,
                client_message_id,
            } => {
                let record_input = MessageRecord {
                    id: client_message_id,
                    from,
                    to,
                    encrypted,
                    local_echo,
                    kind,
                    timestamp_ms: 0,
                    sender_display_name: None,
                };
                self.handle_send_message(connection, &session_id, record_input)
            },
            ClientRequest::LeaveSession { session_id, user_id } => {
                let mut actions = self.handle_departure(&session_id, &user_id);
                let bound_here = self
                    .registry
                    .binding(connection)
                    .is_some_and(|b| b.session_id == session_id && b.user_id == user_id);
                if bound_here {
                    self.registry.unbind(connection);
                }
                actions.push(RelayAction::Log {
                    level: LogLevel::Info,
                    message: format!("user {user_id} left session {session_id}"),
                });
                actions
            },
            ClientRequest::Typing { session_id, user_id, display_name } => self
                .relay_to_peers(&session_id, &user_id, ServerPush::UserTyping {
                    user_id: user_id.clone(),
                    display_name,
                }),
            ClientRequest::StoppedTyping { session_id, user_id, display_name } => self
                .relay_to_peers(&session_id, &user_id, ServerPush::UserStoppedTyping {
                    user_id: user_id.clone(),
                    display_name,
                }),
            ClientRequest::FileDownloaded { session_id, downloaded_by, sender_id, file_name } => {
                self.handle_file_downloaded(&session_id, downloaded_by, &sender_id, file_name)
            },
        }
    }

    fn handle_reserve(
        &mut self,
        connection: u64,
        session_id: SessionId,
        secret: String,
        password_hash: Option<String>,
        mode: ChatMode,
    ) -> Vec<RelayAction> {
        let now = self.env.now();

        let mode_state = match mode {
            ChatMode::Group => ModeState::Group { key_distribution: HashMap::new() },
            ChatMode::Private => ModeState::Private,
            ChatMode::Password => {
                ModeState::Password { password_hash: password_hash.unwrap_or_default() }
            },
        };

        match self.store.insert(session_id.clone(), SessionState::reserved(mode_state, secret, now))
        {
            Ok(()) => vec![
                RelayAction::Send {
                    connection,
                    push: ServerPush::SessionReserved { session_id: session_id.clone(), mode },
                },
                RelayAction::Log {
                    level: LogLevel::Info,
                    message: format!(
                        "session {session_id} reserved (mode: {mode}, waiting for creator)"
                    ),
                },
            ],
            Err(StoreError::AlreadyExists(_)) => {
                self.reject(connection, &session_id, AdmissionError::SessionExists)
            },
        }
    }

    fn handle_join(&mut self, connection: u64, join: &JoinRequest) -> Vec<RelayAction> {
        let now = self.env.now();
        let now_ms = self.env.wall_clock_millis();

        if !self.store.contains(&join.session_id) {
            if join.is_creator {
                // Legacy path: an unreserved session springs into existence,
                // already active, on its creator's join.
                if self
                    .store
                    .insert(join.session_id.clone(), SessionState::lazily_created(now))
                    .is_err()
                {
                    return self.reject(connection, &join.session_id, AdmissionError::SessionExists);
                }
            } else {
                return self.reject(connection, &join.session_id, AdmissionError::SessionNotFound);
            }
        }

        let result = self.store.update(&join.session_id, |session| {
            session.touch(now);
            session.admit(join, connection, now_ms).map(|outcome| JoinSnapshot {
                outcome,
                mode: session.mode(),
                wrapped_session_key: session.wrapped_key_for(&join.user_id),
                history: session.history_for(&join.user_id),
                roster: session.roster(),
                peer_connections: session.connections_except(&join.user_id),
                all_connections: session.all_connections(),
            })
        });

        let Some(result) = result else {
            return self.reject(connection, &join.session_id, AdmissionError::SessionNotFound);
        };

        match result {
            Ok(snapshot) => {
                self.registry.bind(connection, join.session_id.clone(), join.user_id.clone());

                let mut actions = Vec::new();

                if snapshot.outcome == JoinOutcome::Joined {
                    for peer in &snapshot.peer_connections {
                        actions.push(RelayAction::Send {
                            connection: *peer,
                            push: ServerPush::UserJoined {
                                user_id: join.user_id.clone(),
                                display_name: join.display_name.clone(),
                                timestamp_ms: now_ms,
                            },
                        });
                    }
                }

                actions.push(RelayAction::Send {
                    connection,
                    push: ServerPush::MessagesHistory(snapshot.history),
                });
                actions.push(RelayAction::Send {
                    connection,
                    push: ServerPush::SessionMetadata {
                        mode: snapshot.mode,
                        wrapped_session_key: snapshot.wrapped_session_key,
                    },
                });

                for member in &snapshot.all_connections {
                    actions.push(RelayAction::Send {
                        connection: *member,
                        push: ServerPush::PublicKeysUpdated(snapshot.roster.clone()),
                    });
                }

                actions.push(RelayAction::Log {
                    level: LogLevel::Info,
                    message: format!(
                        "user {} joined session {} (mode: {}, members: {})",
                        join.user_id,
                        join.session_id,
                        snapshot.mode,
                        snapshot.all_connections.len()
                    ),
                });

                actions
            },
            Err(err) => self.reject(connection, &join.session_id, err),
        }
    }

    fn handle_save_public_key(
        &mut self,
        session_id: SessionId,
        user_id: UserId,
        public_key: String,
        display_name: Option<String>,
    ) -> Vec<RelayAction> {
        let now = self.env.now();
        let now_ms = self.env.wall_clock_millis();

        let result = self.store.update(&session_id, |session| {
            session.touch(now);
            session.store_public_key(user_id.clone(), public_key, display_name, now_ms);
            (session.roster(), session.all_connections())
        });

        match result {
            Some((roster, connections)) => {
                let mut actions: Vec<RelayAction> = connections
                    .iter()
                    .map(|member| RelayAction::Send {
                        connection: *member,
                        push: ServerPush::PublicKeysUpdated(roster.clone()),
                    })
                    .collect();
                actions.push(RelayAction::Log {
                    level: LogLevel::Debug,
                    message: format!("public key saved for user {user_id} in session {session_id}"),
                });
                actions
            },
            None => vec![RelayAction::Log {
                level: LogLevel::Warn,
                message: format!("public key for unknown session {session_id} dropped"),
            }],
        }
    }

    fn handle_get_public_keys(
        &mut self,
        connection: u64,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Vec<RelayAction> {
        let now = self.env.now();

        let roster = self.store.update(session_id, |session| {
            session.touch(now);
            session.roster()
        });

        match roster {
            Some(roster) => {
                // The requester's own key is omitted; peers only.
                let peers: Vec<PublicKeyEntry> =
                    roster.into_iter().filter(|entry| &entry.user_id != user_id).collect();

                vec![RelayAction::Send {
                    connection,
                    push: ServerPush::PublicKeysUpdated(peers),
                }]
            },
            None => vec![RelayAction::Log {
                level: LogLevel::Warn,
                message: format!("public-key request for unknown session {session_id}"),
            }],
        }
    }

    fn handle_set_session_key(
        &mut self,
        session_id: &SessionId,
        wrapped_keys: HashMap<UserId, String>,
    ) -> Vec<RelayAction> {
        let now = self.env.now();

        let result = self.store.update(session_id, |session| {
            session.touch(now);

            if !session.set_key_distribution(wrapped_keys.clone()) {
                return None;
            }

            // Each member receives only its own wrapped entry.
            let mut targets: Vec<(u64, String)> = wrapped_keys
                .iter()
                .filter_map(|(user, wrapped)| {
                    session.member_connection(user).map(|conn| (conn, wrapped.clone()))
                })
                .collect();
            targets.sort_by_key(|(conn, _)| *conn);
            Some(targets)
        });

        match result {
            Some(Some(targets)) => {
                let mut actions: Vec<RelayAction> = targets
                    .into_iter()
                    .map(|(member, wrapped)| RelayAction::Send {
                        connection: member,
                        push: ServerPush::SessionKeyAvailable { wrapped_session_key: wrapped },
                    })
                    .collect();
                actions.push(RelayAction::Log {
                    level: LogLevel::Info,
                    message: format!("session key set for group session {session_id}"),
                });
                actions
            },
            Some(None) => vec![RelayAction::Log {
                level: LogLevel::Warn,
                message: format!("attempted to set session key for non-group session {session_id}"),
            }],
            None => vec![RelayAction::Log {
                level: LogLevel::Warn,
                message: format!("session key for unknown session {session_id} dropped"),
            }],
        }
    }

    fn handle_send_message(
        &mut self,
        connection: u64,
        session_id: &SessionId,
        mut record: MessageRecord,
    ) -> Vec<RelayAction> {
        let now = self.env.now();
        let now_ms = self.env.wall_clock_millis();

        record.timestamp_ms = now_ms;

        let result = self.store.update(session_id, |session| {
            session.touch(now);
            record.sender_display_name = session.member_display_name(&record.from);

            let first_copy = session.store_message(record.clone());

            let route = match &record.to {
                Destination::All => Ok(session.connections_except(&record.from)),
                Destination::Peer(target) => {
                    session.member_connection(target).map(|conn| vec![conn]).ok_or(target.clone())
                },
            };

            (first_copy, route)
        });

        let Some((first_copy, route)) = result else {
            return vec![RelayAction::Log {
                level: LogLevel::Warn,
                message: format!("message for unknown session {session_id} dropped"),
            }];
        };

        let mut actions = Vec::new();

        // Copies routed to recipients never carry the sender's local echo.
        let mut routed = record.clone();
        routed.local_echo = None;

        match route {
            Ok(targets) => {
                for target in targets {
                    actions.push(RelayAction::Send {
                        connection: target,
                        push: ServerPush::NewMessage(routed.clone()),
                    });
                }
            },
            Err(missing) => {
                // Best-effort: the sender still gets its confirmation below.
                actions.push(RelayAction::Log {
                    level: LogLevel::Warn,
                    message: format!(
                        "recipient {missing} not found in session {session_id}, message {} dropped",
                        record.id
                    ),
                });
            },
        }

        if first_copy {
            actions.push(RelayAction::Send {
                connection,
                push: ServerPush::MessageSent(record.clone()),
            });
            actions.push(RelayAction::Log {
                level: LogLevel::Debug,
                message: format!("stored message {} in session {session_id}", record.id),
            });
        }

        actions
    }

    /// Remove a member and notify the remainder; evict the session if it is
    /// now empty. Shared by explicit leave and disconnect.
    fn handle_departure(&mut self, session_id: &SessionId, user_id: &UserId) -> Vec<RelayAction> {
        let now = self.env.now();
        let now_ms = self.env.wall_clock_millis();

        let result = self.store.update(session_id, |session| {
            session.touch(now);
            session.remove_member(user_id).map(|member| {
                (member.display_name, session.roster(), session.all_connections(), session.is_empty())
            })
        });

        match result {
            Some(Some((display_name, roster, remaining, empty))) => {
                let mut actions = Vec::new();

                for member in &remaining {
                    actions.push(RelayAction::Send {
                        connection: *member,
                        push: ServerPush::UserLeft {
                            user_id: user_id.clone(),
                            display_name: display_name.clone(),
                            timestamp_ms: now_ms,
                        },
                    });
                }
                for member in &remaining {
                    actions.push(RelayAction::Send {
                        connection: *member,
                        push: ServerPush::PublicKeysUpdated(roster.clone()),
                    });
                }

                if empty {
                    self.store.remove(session_id);
                    actions.push(RelayAction::Log {
                        level: LogLevel::Debug,
                        message: format!("session {session_id} deleted (no members)"),
                    });
                }

                actions
            },
            Some(None) | None => vec![RelayAction::Log {
                level: LogLevel::Debug,
                message: format!("departure of {user_id} from {session_id}: nothing to do"),
            }],
        }
    }

    fn relay_to_peers(
        &mut self,
        session_id: &SessionId,
        user_id: &UserId,
        push: ServerPush,
    ) -> Vec<RelayAction> {
        let now = self.env.now();

        let targets = self.store.update(session_id, |session| {
            session.touch(now);
            session.connections_except(user_id)
        });

        match targets {
            Some(targets) => targets
                .into_iter()
                .map(|member| RelayAction::Send { connection: member, push: push.clone() })
                .collect(),
            None => vec![RelayAction::Log {
                level: LogLevel::Debug,
                message: format!("indicator for unknown session {session_id} dropped"),
            }],
        }
    }

    fn handle_file_downloaded(
        &mut self,
        session_id: &SessionId,
        downloaded_by: String,
        sender_id: &UserId,
        file_name: String,
    ) -> Vec<RelayAction> {
        let now = self.env.now();
        let now_ms = self.env.wall_clock_millis();

        let target = self.store.update(session_id, |session| {
            session.touch(now);
            session.member_connection(sender_id)
        });

        match target {
            Some(Some(member)) => vec![
                RelayAction::Send {
                    connection: member,
                    push: ServerPush::DownloadNotification {
                        downloaded_by,
                        file_name,
                        timestamp_ms: now_ms,
                    },
                },
                RelayAction::Log {
                    level: LogLevel::Debug,
                    message: format!("download notification routed to {sender_id}"),
                },
            ],
            Some(None) => vec![RelayAction::Log {
                level: LogLevel::Warn,
                message: format!("sender {sender_id} not found in session {session_id}"),
            }],
            None => vec![RelayAction::Log {
                level: LogLevel::Warn,
                message: format!("download notification for unknown session {session_id} dropped"),
            }],
        }
    }

    fn handle_connection_closed(&mut self, connection: u64, reason: &str) -> Vec<RelayAction> {
        let binding = self.registry.unregister(connection);

        let mut actions = match &binding {
            Some(binding) => self.handle_departure(&binding.session_id, &binding.user_id),
            None => Vec::new(),
        };

        actions.push(RelayAction::Log {
            level: LogLevel::Info,
            message: match binding {
                Some(binding) => format!(
                    "connection {connection} closed: {reason} (user {} in session {})",
                    binding.user_id, binding.session_id
                ),
                None => format!("connection {connection} closed: {reason}"),
            },
        });

        actions
    }

    fn handle_tick(&mut self) -> Vec<RelayAction> {
        let now = self.env.now();
        let grace = self.config.empty_session_grace;
        let orphan = self.config.orphan_window;

        let mut actions = Vec::new();
        let mut cleaned = 0usize;

        for session_id in self.store.session_ids() {
            let expired = self.store.update(&session_id, |session| {
                let idle = now - session.last_activity();
                (session.is_empty() && idle > grace) || idle > orphan
            });

            if expired == Some(true) {
                self.store.remove(&session_id);
                cleaned += 1;
                actions.push(RelayAction::Log {
                    level: LogLevel::Debug,
                    message: format!("auto-cleaned expired session {session_id}"),
                });
            }
        }

        if cleaned > 0 {
            actions.push(RelayAction::Log {
                level: LogLevel::Debug,
                message: format!(
                    "cleaned {cleaned} expired session(s), {} active",
                    self.store.len()
                ),
            });
        }

        actions
    }

    fn reject(
        &self,
        connection: u64,
        session_id: &SessionId,
        error: AdmissionError,
    ) -> Vec<RelayAction> {
        vec![
            RelayAction::Send {
                connection,
                push: ServerPush::SessionError {
                    code: error.code(),
                    message: error.user_message().to_string(),
                },
            },
            RelayAction::Log {
                level: LogLevel::Warn,
                message: format!("request rejected for session {session_id}: {error}"),
            },
        ]
    }
}

impl<E, S> std::fmt::Debug for RelayDriver<E, S>
where
    E: Environment,
    S: SessionStore<E::Instant>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayDriver")
            .field("connection_count", &self.registry.connection_count())
            .field("session_count", &self.store.len())
            .finish()
    }
}
