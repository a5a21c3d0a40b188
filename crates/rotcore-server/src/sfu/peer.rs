use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

use super::engine::RtcConnection;
use super::registry::PeerRegistry;

/// Negotiation progress of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Connection exists and tracks are attached
    Created,
    /// Remote offer applied
    Offered,
    /// Local answer applied
    Answered,
    /// ICE connected
    Established,
    Failed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A live peer connection owned by the [`PeerRegistry`].
///
/// The session knows its own peer ID and holds a weak reference to the
/// registry, so the engine's ICE callback can tear it down through
/// [`PeerSession::on_state_change`] at any time.
pub struct PeerSession {
    peer_id: String,
    /// Distinguishes successive sessions of the same peer ID
    serial: u64,
    connection: Arc<dyn RtcConnection>,
    registry: Weak<PeerRegistry>,
    state: RwLock<PeerState>,
    closed: AtomicBool,
}

impl PeerSession {
    pub fn new(
        peer_id: String,
        serial: u64,
        connection: Arc<dyn RtcConnection>,
        registry: Weak<PeerRegistry>,
    ) -> Self {
        Self {
            peer_id,
            serial,
            connection,
            registry,
            state: RwLock::new(PeerState::Created),
            closed: AtomicBool::new(false),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn state(&self) -> PeerState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: PeerState) {
        let mut current = self.state.write();
        if *current != state {
            tracing::debug!("Peer {} {} -> {}", self.peer_id, *current, state);
            *current = state;
        }
    }

    pub fn connection(&self) -> &Arc<dyn RtcConnection> {
        &self.connection
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the underlying connection. Only the first call reaches the engine.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self.connection.close().await {
            tracing::warn!("Error closing peer connection {}: {}", self.peer_id, e);
        }
    }

    /// ICE connection state callback
    pub async fn on_state_change(&self, state: RTCIceConnectionState) {
        tracing::info!("ICE state change for peer {}: {}", self.peer_id, state);

        match state {
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                if !self.is_closed() {
                    self.set_state(PeerState::Established);
                }
            }
            RTCIceConnectionState::Failed => {
                self.set_state(PeerState::Failed);
                match self.registry.upgrade() {
                    Some(registry) => registry.remove_session(self).await,
                    None => self.close().await,
                }
            }
            _ => {}
        }
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.peer_id)
            .field("serial", &self.serial)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}
