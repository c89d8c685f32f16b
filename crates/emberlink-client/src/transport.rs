//! QUIC transport for the client.
//!
//! Provides [`ConnectedRelay`], a thin layer bridging relay frames to mpsc
//! channels. Each request goes out on its own unidirectional stream; pushes
//! arrive on the relay's persistent push stream. Protocol logic stays in
//! the Sans-IO [`crate::SessionClient`].

use std::net::SocketAddr;
use std::sync::Arc;

use emberlink_proto::{ClientRequest, MAX_FRAME_BYTES, ServerPush, decode_frame, encode_frame};
use quinn::{ClientConfig, Endpoint, RecvStream};
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Handle to a connected relay.
///
/// Requests are sent and pushes received via the channels; an internal task
/// handles the QUIC I/O.
pub struct ConnectedRelay {
    /// Send requests to the relay.
    pub to_relay: mpsc::Sender<ClientRequest>,
    /// Receive pushes from the relay.
    pub from_relay: mpsc::Receiver<ServerPush>,
    /// Abort handle to stop the connection task.
    abort_handle: tokio::task::AbortHandle,
}

impl ConnectedRelay {
    /// Stop the connection.
    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

/// Connect to an Emberlink relay via QUIC.
pub async fn connect(relay_addr: &str) -> Result<ConnectedRelay, TransportError> {
    let addr: SocketAddr = relay_addr
        .parse()
        .map_err(|e| TransportError::Connection(format!("invalid address: {e}")))?;

    let client_config = insecure_client_config()?;
    let mut endpoint = Endpoint::client(
        "0.0.0.0:0".parse().map_err(|e| TransportError::Connection(format!("bind: {e}")))?,
    )
    .map_err(|e| TransportError::Connection(format!("endpoint creation failed: {e}")))?;
    endpoint.set_default_client_config(client_config);

    let connection = endpoint
        .connect(addr, "localhost")
        .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?
        .await
        .map_err(|e| TransportError::Connection(format!("connection failed: {e}")))?;

    let (to_relay_tx, to_relay_rx) = mpsc::channel::<ClientRequest>(32);
    let (from_relay_tx, from_relay_rx) = mpsc::channel::<ServerPush>(32);

    let handle = tokio::spawn(run_connection(connection, to_relay_rx, from_relay_tx));

    Ok(ConnectedRelay {
        to_relay: to_relay_tx,
        from_relay: from_relay_rx,
        abort_handle: handle.abort_handle(),
    })
}

/// Run the connection, bridging between channels and QUIC.
async fn run_connection(
    connection: quinn::Connection,
    mut to_relay: mpsc::Receiver<ClientRequest>,
    from_relay: mpsc::Sender<ServerPush>,
) {
    // Receiver task for the relay's persistent push stream.
    let conn_recv = connection.clone();
    let recv_handle = tokio::spawn(async move {
        match conn_recv.accept_uni().await {
            Ok(recv) => {
                if let Err(e) = pump_push_stream(recv, from_relay).await {
                    tracing::debug!("push stream ended: {e}");
                }
            },
            Err(e) => tracing::debug!("accept_uni failed: {e}"),
        }
    });

    // Main loop: each outgoing request gets its own stream.
    while let Some(request) = to_relay.recv().await {
        let mut buf = Vec::new();
        if let Err(e) = encode_frame(&request, &mut buf) {
            tracing::warn!("request encode failed: {e}");
            continue;
        }

        match connection.open_uni().await {
            Ok(mut send) => {
                if let Err(e) = send.write_all(&buf).await {
                    tracing::warn!("request write failed: {e}");
                } else if let Err(e) = send.finish() {
                    tracing::warn!("stream finish failed: {e}");
                }
            },
            Err(e) => tracing::warn!("open_uni failed: {e}"),
        }
    }

    recv_handle.abort();
}

/// Decode pushes off the persistent relay stream as they arrive.
async fn pump_push_stream(
    mut recv: RecvStream,
    tx: mpsc::Sender<ServerPush>,
) -> Result<(), TransportError> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];

    loop {
        let read = recv
            .read(&mut chunk)
            .await
            .map_err(|e| TransportError::Stream(format!("read failed: {e}")))?;

        let Some(read) = read else {
            return Ok(()); // stream finished
        };
        buf.extend_from_slice(&chunk[..read]);

        if buf.len() > MAX_FRAME_BYTES + 16 {
            return Err(TransportError::Protocol("push frame exceeds size limit".to_string()));
        }

        loop {
            match decode_frame::<ServerPush>(&buf) {
                Ok(Some((push, consumed))) => {
                    buf.drain(..consumed);
                    tx.send(push)
                        .await
                        .map_err(|e| TransportError::Stream(format!("channel send: {e}")))?;
                },
                Ok(None) => break,
                Err(e) => {
                    return Err(TransportError::Protocol(format!("push decode failed: {e}")));
                },
            }
        }
    }
}

/// Create an insecure client config that accepts any certificate.
///
/// WARNING: Development only. Production should verify certificates.
fn insecure_client_config() -> Result<ClientConfig, TransportError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();

    // Must match the relay's ALPN protocol.
    crypto.alpn_protocols = vec![b"emberlink".to_vec()];

    let quic_config = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| TransportError::Connection(format!("rustls config: {e}")))?;

    let mut config = ClientConfig::new(Arc::new(quic_config));

    let mut transport = quinn::TransportConfig::default();
    let idle = std::time::Duration::from_secs(30)
        .try_into()
        .map_err(|_| TransportError::Connection("invalid idle timeout".to_string()))?;
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate (insecure, for
/// development).
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
