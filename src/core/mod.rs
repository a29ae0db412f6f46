//! Core types, constants, and errors (always included).

pub mod constants;
mod error;
mod types;

pub use error::*;
pub use types::*;
