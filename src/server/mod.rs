//! Relay Transport - Server
//!
//! Accepting side: listen socket, capacity limit, handshake, peer fan-out.

#[allow(clippy::module_inception)]
mod server;

pub use crate::connection::LoopbackHost;
pub use server::*;
