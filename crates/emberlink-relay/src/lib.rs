//! Emberlink production relay.
//!
//! The relay is a stateless ciphertext router: all durable-looking state
//! (sessions, rosters, message history) lives in process memory and dies
//! with the process. It enforces admission and routing rules per session
//! mode but never holds key material and never decrypts a payload.
//!
//! # Architecture
//!
//! This crate provides production "glue" that wraps the Sans-IO
//! [`RelayDriver`] with real I/O. The driver turns events into actions;
//! [`Server`] executes the actions using Quinn QUIC and the Tokio runtime.
//!
//! # Components
//!
//! - [`RelayDriver`]: action-based orchestrator (pure logic, no I/O)
//! - [`SessionStore`] / [`MemoryStore`]: injected session state store
//! - [`Server`]: production runtime executing driver actions
//! - [`QuinnTransport`]: QUIC transport via the Quinn library
//! - [`SystemEnv`]: production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
mod registry;
mod session;
mod store;
mod system_env;
mod transport;

use std::collections::HashMap;
use std::sync::Arc;

pub use driver::{LogLevel, RelayAction, RelayConfig, RelayDriver, RelayEvent};
use emberlink_core::env::Environment;
use emberlink_proto::{ClientRequest, MAX_FRAME_BYTES, decode_frame, encode_frame};
pub use error::{AdmissionError, RelayError, ServerError};
pub use registry::{Binding, ConnectionRegistry};
pub use session::{JoinOutcome, MemberInfo, ModeState, SessionState};
pub use store::{MemoryStore, SessionStore, StoreError};
pub use system_env::SystemEnv;
use tokio::sync::RwLock;
pub use transport::{ALPN_PROTOCOL, QuinnConnection, QuinnTransport};

/// The driver type the production server runs.
type ProductionDriver = RelayDriver<SystemEnv, MemoryStore<std::time::Instant>>;

/// Shared per-connection state for the runtime.
struct SharedState {
    /// Connection id → QUIC connection (for closing).
    connections: RwLock<HashMap<u64, QuinnConnection>>,
    /// Connection id → persistent push stream. All pushes to a client go
    /// through this single stream, preserving ordering.
    push_streams: RwLock<HashMap<u64, tokio::sync::Mutex<quinn::SendStream>>>,
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433").
    pub bind_address: String,
    /// Path to TLS certificate (PEM format).
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format).
    pub key_path: Option<String>,
    /// Driver configuration (limits, eviction windows).
    pub relay: RelayConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            relay: RelayConfig::default(),
        }
    }
}

/// Production Emberlink relay server.
///
/// Wraps [`RelayDriver`] with Quinn QUIC transport and the system
/// environment.
pub struct Server {
    driver: ProductionDriver,
    transport: QuinnTransport,
    env: SystemEnv,
    sweep_interval: std::time::Duration,
}

impl Server {
    /// Create and bind a new server.
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let store = MemoryStore::new();
        let sweep_interval = config.relay.sweep_interval;
        let driver = RelayDriver::new(env.clone(), store, config.relay);

        let transport =
            QuinnTransport::bind(&config.bind_address, config.cert_path, config.key_path)?;

        Ok(Self { driver, transport, env, sweep_interval })
    }

    /// Run the server, accepting connections and processing requests.
    ///
    /// Runs until the process is shut down or the endpoint fails.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Relay starting on {}", self.transport.local_addr()?);

        let env = self.env;
        let driver = Arc::new(tokio::sync::Mutex::new(self.driver));
        let shared = Arc::new(SharedState {
            connections: RwLock::new(HashMap::new()),
            push_streams: RwLock::new(HashMap::new()),
        });

        // Eviction sweep: the same store the handlers mutate, through the
        // same driver, on a timer.
        {
            let driver = Arc::clone(&driver);
            let shared = Arc::clone(&shared);
            let env = env.clone();
            let interval = self.sweep_interval;

            tokio::spawn(async move {
                loop {
                    env.sleep(interval).await;

                    let actions = {
                        let mut driver = driver.lock().await;
                        driver.process_event(RelayEvent::Tick)
                    };

                    match actions {
                        Ok(actions) => execute_actions(actions, &shared).await,
                        Err(e) => tracing::error!("Sweep error: {}", e),
                    }
                }
            });
        }

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let driver = Arc::clone(&driver);
                    let shared = Arc::clone(&shared);
                    let env = env.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, driver, shared, env).await {
                            tracing::debug!("Connection error: {}", e);
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }
}

/// Handle a single QUIC connection.
async fn handle_connection(
    conn: QuinnConnection,
    driver: Arc<tokio::sync::Mutex<ProductionDriver>>,
    shared: Arc<SharedState>,
    env: SystemEnv,
) -> Result<(), ServerError> {
    let connection_id = env.random_u64();

    tracing::debug!("New connection: {} from {}", connection_id, conn.remote_addr());

    let push_stream = conn.open_uni().await?;

    {
        let mut connections = shared.connections.write().await;
        connections.insert(connection_id, conn.clone());
    }
    {
        let mut streams = shared.push_streams.write().await;
        streams.insert(connection_id, tokio::sync::Mutex::new(push_stream));
    }

    {
        let mut driver = driver.lock().await;
        let actions = driver.process_event(RelayEvent::ConnectionAccepted {
            connection: connection_id,
        })?;
        drop(driver);
        execute_actions(actions, &shared).await;
    }

    loop {
        match conn.accept_uni().await {
            Ok(recv) => {
                let driver = Arc::clone(&driver);
                let shared = Arc::clone(&shared);

                tokio::spawn(async move {
                    if let Err(e) = handle_request_stream(connection_id, recv, driver, &shared).await
                    {
                        tracing::debug!("Stream error: {}", e);
                    }
                });
            },
            Err(e) => {
                tracing::debug!("Connection closed: {}", e);
                break;
            },
        }
    }

    {
        let mut connections = shared.connections.write().await;
        connections.remove(&connection_id);
    }
    {
        let mut streams = shared.push_streams.write().await;
        streams.remove(&connection_id);
    }

    {
        let mut driver = driver.lock().await;
        let actions = driver.process_event(RelayEvent::ConnectionClosed {
            connection: connection_id,
            reason: "connection closed".to_string(),
        })?;
        drop(driver);
        execute_actions(actions, &shared).await;
    }

    Ok(())
}

/// Read and process the requests carried by one client-opened stream.
async fn handle_request_stream(
    connection_id: u64,
    mut recv: quinn::RecvStream,
    driver: Arc<tokio::sync::Mutex<ProductionDriver>>,
    shared: &Arc<SharedState>,
) -> Result<(), ServerError> {
    let buf = recv
        .read_to_end(MAX_FRAME_BYTES + 16)
        .await
        .map_err(|e| ServerError::Transport(format!("stream read failed: {e}")))?;

    let mut offset = 0;
    while offset < buf.len() {
        let (request, consumed) = match decode_frame::<ClientRequest>(&buf[offset..]) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::warn!("Truncated frame from connection {}", connection_id);
                break;
            },
            Err(e) => {
                tracing::warn!("Frame decode error from connection {}: {}", connection_id, e);
                break;
            },
        };
        offset += consumed;

        let actions = {
            let mut driver = driver.lock().await;
            match driver.process_event(RelayEvent::RequestReceived {
                connection: connection_id,
                request,
            }) {
                Ok(actions) => actions,
                Err(e) => {
                    tracing::warn!("Request processing error: {}", e);
                    continue;
                },
            }
        };

        execute_actions(actions, shared).await;
    }

    Ok(())
}

/// Execute relay actions against the transport.
async fn execute_actions(actions: Vec<RelayAction>, shared: &SharedState) {
    for action in actions {
        match action {
            RelayAction::Send { connection, push } => {
                let mut buf = Vec::new();
                if let Err(e) = encode_frame(&push, &mut buf) {
                    tracing::error!("Failed to encode push for {}: {}", connection, e);
                    continue;
                }

                let streams = shared.push_streams.read().await;
                if let Some(stream_mutex) = streams.get(&connection) {
                    let mut stream = stream_mutex.lock().await;
                    if let Err(e) = stream.write_all(&buf).await {
                        tracing::warn!("Push write failed for {}: {}", connection, e);
                    }
                } else {
                    tracing::warn!("Push target {} not connected", connection);
                }
            },

            RelayAction::Close { connection, reason } => {
                tracing::info!("Closing connection {}: {}", connection, reason);
                let mut connections = shared.connections.write().await;
                if let Some(conn) = connections.remove(&connection) {
                    conn.close(0u32.into(), reason.as_bytes());
                }
            },

            RelayAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}
