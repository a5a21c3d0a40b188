//! Rotcore Protocol
//!
//! Wire types shared by the SFU server and its clients: RPC request and
//! response bodies, WebSocket event envelopes, and signaling events.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
