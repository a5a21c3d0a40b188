//! SFU (Selective Forwarding Unit) core
//!
//! Relays media from external UDP sources into shared outbound tracks and
//! negotiates one send-only peer connection per client. Media is forwarded
//! as-is, without any processing or transcoding.

pub mod engine;
mod error;
pub mod negotiator;
pub mod peer;
pub mod registry;
pub mod relay;
mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineSettings, RtcConnection, RtcEngine, WebRtcEngine};
pub use error::PeerError;
pub use negotiator::{CandidateMode, Negotiator};
pub use peer::{PeerSession, PeerState};
pub use registry::PeerRegistry;
pub use relay::{CodecKind, MediaRelay, RelayTrack, StreamSource};
pub use server::SfuServer;
