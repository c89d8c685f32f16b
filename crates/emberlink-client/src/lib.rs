//! Emberlink client.
//!
//! Action-based (Sans-IO) client state machine for Emberlink sessions. The
//! caller owns I/O and time; [`SessionClient`] owns the protocol: identity
//! keys, the join handshake, mode-specific encryption paths, group-key
//! distribution, and decryption with a benign failure state.
//!
//! ```no_run
//! use emberlink_client::{ClientConfig, ClientEvent, SessionClient};
//! use emberlink_proto::{SessionLocator, UserId};
//! # fn run<E: emberlink_core::env::Environment>(env: E) -> Result<(), Box<dyn std::error::Error>> {
//! let locator = SessionLocator::parse("a1b2c3:secret")?;
//! let config = ClientConfig::new(locator, UserId::new("u-1"));
//! let mut client = SessionClient::new(env, config)?;
//!
//! // Transport connected: the client emits the join handshake.
//! let actions = client.handle(ClientEvent::Connected)?;
//! # let _ = actions; Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod event;
#[cfg(feature = "transport")]
pub mod transport;

pub use client::{ClientConfig, SessionClient};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent, MessageContent};
