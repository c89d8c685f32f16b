//! Shared helpers for relay integration tests: a deterministic environment
//! with a manually advanced clock, and builders for common requests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use emberlink_core::env::Environment;
use emberlink_proto::{
    ChatMode, ClientRequest, Credential, Destination, JoinRequest, MessageId, MessageKind,
    ServerPush, SessionErrorCode, SessionId, UserId,
};
use emberlink_relay::{MemoryStore, RelayAction, RelayConfig, RelayDriver, RelayEvent};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

struct TestEnvInner {
    now: Instant,
    wall_ms: u64,
    rng: ChaCha20Rng,
}

/// Deterministic environment: manual clock, seeded RNG.
#[derive(Clone)]
pub struct TestEnv {
    inner: Arc<Mutex<TestEnvInner>>,
}

impl TestEnv {
    #[allow(clippy::disallowed_methods)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TestEnvInner {
                now: Instant::now(),
                wall_ms: 1_700_000_000_000,
                rng: ChaCha20Rng::seed_from_u64(42),
            })),
        }
    }

    /// Advance both clocks by `duration`.
    #[allow(clippy::unwrap_used)]
    pub fn advance(&self, duration: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.now += duration;
        inner.wall_ms += duration.as_millis() as u64;
    }
}

impl Environment for TestEnv {
    type Instant = Instant;

    #[allow(clippy::unwrap_used)]
    fn now(&self) -> Instant {
        self.inner.lock().unwrap().now
    }

    #[allow(clippy::unwrap_used)]
    fn wall_clock_millis(&self) -> u64 {
        self.inner.lock().unwrap().wall_ms
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    #[allow(clippy::unwrap_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.inner.lock().unwrap().rng.fill_bytes(buffer);
    }
}

pub type TestRelay = RelayDriver<TestEnv, MemoryStore<Instant>>;

/// A relay driver with default config and its environment handle.
pub fn relay() -> (TestRelay, TestEnv) {
    relay_with_config(RelayConfig::default())
}

pub fn relay_with_config(config: RelayConfig) -> (TestRelay, TestEnv) {
    let env = TestEnv::new();
    (RelayDriver::new(env.clone(), MemoryStore::new(), config), env)
}

#[allow(clippy::unwrap_used)]
pub fn connect(relay: &mut TestRelay, connection: u64) {
    relay.process_event(RelayEvent::ConnectionAccepted { connection }).unwrap();
}

#[allow(clippy::unwrap_used)]
pub fn request(relay: &mut TestRelay, connection: u64, request: ClientRequest) -> Vec<RelayAction> {
    relay.process_event(RelayEvent::RequestReceived { connection, request }).unwrap()
}

pub fn reserve(
    relay: &mut TestRelay,
    connection: u64,
    session: &str,
    secret: &str,
    password_hash: Option<&str>,
    mode: ChatMode,
) -> Vec<RelayAction> {
    request(relay, connection, ClientRequest::ReserveSession {
        session_id: SessionId::new(session),
        secret: secret.to_string(),
        password_hash: password_hash.map(str::to_string),
        mode,
    })
}

pub fn join(
    relay: &mut TestRelay,
    connection: u64,
    session: &str,
    user: &str,
    is_creator: bool,
    credential: Option<Credential>,
) -> Vec<RelayAction> {
    request(
        relay,
        connection,
        ClientRequest::JoinSession(JoinRequest {
            session_id: SessionId::new(session),
            user_id: UserId::new(user),
            display_name: Some(user.to_uppercase()),
            public_key: Some(format!("{user}-pk")),
            is_creator,
            credential,
        }),
    )
}

pub fn plain(secret: &str) -> Option<Credential> {
    Some(Credential::Plain(secret.to_string()))
}

pub fn send_message(
    relay: &mut TestRelay,
    connection: u64,
    session: &str,
    from: &str,
    to: Destination,
    encrypted: &str,
    local_echo: Option<&str>,
    message_id: &str,
) -> Vec<RelayAction> {
    request(relay, connection, ClientRequest::SendMessage {
        session_id: SessionId::new(session),
        from: UserId::new(from),
        to,
        encrypted: encrypted.to_string(),
        local_echo: local_echo.map(str::to_string),
        kind: MessageKind::Text,
        client_message_id: MessageId::new(message_id),
    })
}

/// All pushes addressed to one connection, in action order.
pub fn pushes_to(actions: &[RelayAction], connection: u64) -> Vec<ServerPush> {
    actions
        .iter()
        .filter_map(|action| match action {
            RelayAction::Send { connection: target, push } if *target == connection => {
                Some(push.clone())
            },
            _ => None,
        })
        .collect()
}

/// The first session-error code in the actions, if any.
pub fn first_error(actions: &[RelayAction]) -> Option<SessionErrorCode> {
    actions.iter().find_map(|action| match action {
        RelayAction::Send { push: ServerPush::SessionError { code, .. }, .. } => Some(*code),
        _ => None,
    })
}
