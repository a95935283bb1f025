//! # uanode-protocol
//!
//! uanode protocol message types and codec.
//!
//! This crate defines the WebSocket message formats.

pub mod codec;
pub mod messages;

pub use codec::*;
pub use messages::*;
