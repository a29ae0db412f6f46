//! Relay Transport - Client
//!
//! Connecting side: address parsing, connect deadline, one outbound connection.

mod address;
#[allow(clippy::module_inception)]
mod client;
mod timeout;

pub use address::*;
pub use client::*;
