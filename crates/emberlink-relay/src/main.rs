//! Emberlink relay binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate (development)
//! emberlink-relay --bind 0.0.0.0:4433
//!
//! # Start with TLS certificate (production)
//! emberlink-relay --bind 0.0.0.0:4433 --cert cert.pem --key key.pem
//! ```

use clap::Parser;
use emberlink_relay::{RelayConfig, Server, ServerRuntimeConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Emberlink ephemeral messaging relay
#[derive(Parser, Debug)]
#[command(name = "emberlink-relay")]
#[command(about = "Stateless relay for ephemeral end-to-end-encrypted sessions")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Minutes an empty session survives before eviction
    #[arg(long, default_value = "30")]
    empty_grace_minutes: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Emberlink relay starting");
    tracing::info!("Binding to {}", args.bind);

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("No TLS certificate provided - using self-signed certificate");
        tracing::warn!("This is NOT suitable for production use!");
    }

    let empty_grace = std::time::Duration::from_secs(args.empty_grace_minutes * 60);
    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        relay: RelayConfig {
            max_connections: args.max_connections,
            empty_session_grace: empty_grace,
            // Orphaned sessions (dead sockets still counted as members) get
            // four grace windows before forced reclamation.
            orphan_window: empty_grace * 4,
            ..Default::default()
        },
    };

    let server = Server::bind(config)?;

    tracing::info!("Relay listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
