//! # Relay Transport
//!
//! Connection lifecycle, handshake and framing for client/server sessions
//! running over a relay-style peer-to-peer socket layer instead of raw
//! UDP/TCP.
//!
//! The socket layer (delivery, retransmission, encryption, NAT traversal)
//! is consumed through the narrow [`transport::RawTransport`] trait. On top
//! of it this crate provides:
//!
//! - **Handshake**: the server assigns each client a short connection id and
//!   the client acknowledges it before any application traffic flows
//! - **Registry**: live connections looked up by id or by peer identity
//! - **Early buffering**: payloads that race ahead of the handshake are held
//!   back and delivered in order once the connection is up
//! - **Loopback**: a client can attach to a server in the same process
//!   without going through the relay
//!
//! ## Feature Flags
//!
//! - `client` (default): [`client::ClientSession`] and the connect deadline
//! - `server` (default): [`server::ServerSession`]
//! - `memory` (default): [`transport::MemoryRelay`], an in-process relay
//!
//! ## Modules
//!
//! - [`core`]: Constants, value types and error types (always included)
//! - [`transport`]: Transport capability trait and event plumbing
//! - [`protocol`]: Wire frames and handshake state
//! - [`connection`]: Connection records, registry, id pool, early buffer
//! - [`client`]: Client role (requires `client` feature)
//! - [`server`]: Server role (requires `server` feature)
//!
//! ## Example Usage
//!
//! ```ignore
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use relay_transport::prelude::*;
//!
//! let relay = MemoryRelay::new();
//! let host = PeerIdentity::new(1);
//!
//! let server = Rc::new(RefCell::new(ServerSession::new(
//!     relay.endpoint(host),
//!     ServerConfig::default(),
//! )));
//! server.borrow_mut().start(0, 8)?;
//!
//! let mut client = ClientSession::new(relay.endpoint(host), ClientConfig::default());
//! client.set_local_server(Some(server.clone()));
//! client.connect("localhost")?;
//! assert!(client.is_connected());
//!
//! for event in server.borrow_mut().poll() {
//!     println!("server: {event:?}");
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Transport capability and plumbing (always included)
pub mod transport;

// Wire format and handshake (always included)
pub mod protocol;

// Connection records and registry (always included)
pub mod connection;

// Client role (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Server role (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::connection::{ConnectionInfo, LoopbackHost};
    pub use crate::transport::{RawTransport, SendError, TransportError, TransportEvent, TransportHandle};

    #[cfg(feature = "memory")]
    pub use crate::transport::{MemoryRelay, MemoryTransport};

    #[cfg(feature = "client")]
    pub use crate::client::{ClientConfig, ClientEvent, ClientSession, HostAddress};

    #[cfg(feature = "server")]
    pub use crate::server::{ServerConfig, ServerError, ServerEvent, ServerSession};
}

// Re-export commonly used items at crate root
pub use crate::core::{
    ConnectError, ConnectionId, ConnectionState, DisconnectReason, Error, PeerIdentity,
    RegistryError, SendMode,
};
