//! Negotiation Engine
//!
//! Drives offer/answer and ICE candidate exchange for one peer at a time.
//! A session is registered before any description is applied, and every
//! failure past that point rolls the registration back.

use anyhow::Context;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

use rotcore_protocol::{CandidateInit, SignalingEvent};

use super::engine::{RtcConnection, RtcEngine};
use super::error::PeerError;
use super::peer::{PeerSession, PeerState};
use super::registry::PeerRegistry;
use super::relay::RelayTrack;

pub const DEFAULT_GATHER_TIMEOUT: Duration = Duration::from_secs(2);

/// How server-side ICE candidates reach the client
#[derive(Debug, Clone)]
pub enum CandidateMode {
    /// Forward each local candidate as an outbound event; answer immediately
    Trickle(mpsc::UnboundedSender<SignalingEvent>),
    /// Wait for gathering and embed the candidates in the answer
    Gathered { timeout: Duration },
}

impl Default for CandidateMode {
    fn default() -> Self {
        CandidateMode::Gathered {
            timeout: DEFAULT_GATHER_TIMEOUT,
        }
    }
}

pub struct Negotiator {
    engine: Arc<dyn RtcEngine>,
    registry: Arc<PeerRegistry>,
    tracks: Vec<RelayTrack>,
    mode: CandidateMode,
    next_serial: AtomicU64,
}

impl Negotiator {
    pub fn new(
        engine: Arc<dyn RtcEngine>,
        registry: Arc<PeerRegistry>,
        tracks: Vec<RelayTrack>,
        mode: CandidateMode,
    ) -> Self {
        Self {
            engine,
            registry,
            tracks,
            mode,
            next_serial: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Negotiate a new session for `peer_id` and return the SDP answer
    pub async fn handshake(&self, peer_id: &str, offer: String) -> Result<String, PeerError> {
        if peer_id.is_empty() {
            return Err(PeerError::MissingPeerId);
        }

        tracing::info!("Handshake from peer {}", peer_id);

        let connection = self
            .engine
            .new_connection()
            .await
            .context("failed to create peer connection")
            .map_err(PeerError::Negotiation)?;

        for relay in &self.tracks {
            if let Err(e) = connection.add_send_track(relay.track.clone()).await {
                if let Err(close_err) = connection.close().await {
                    tracing::warn!(
                        "Failed to close connection for peer {}: {}",
                        peer_id,
                        close_err
                    );
                }
                return Err(PeerError::Negotiation(
                    e.context(format!("failed to attach {} track", relay.source.codec)),
                ));
            }
        }

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(PeerSession::new(
            peer_id.to_string(),
            serial,
            connection.clone(),
            Arc::downgrade(&self.registry),
        ));

        self.watch(&session, connection.as_ref());

        if let Some(previous) = self.registry.add(session.clone()).await {
            tracing::info!("Closing previous session of peer {}", peer_id);
            previous.close().await;
        }

        match self.exchange(&session, offer).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                tracing::error!("Handshake with peer {} failed: {:#}", peer_id, e);
                session.set_state(PeerState::Failed);
                self.registry.remove_session(&session).await;
                Err(PeerError::Negotiation(e))
            }
        }
    }

    /// Register the engine callbacks that feed back into the session
    fn watch(&self, session: &Arc<PeerSession>, connection: &dyn RtcConnection) {
        let weak = Arc::downgrade(session);
        connection.on_ice_state_change(Box::new(move |state: RTCIceConnectionState| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(session) = weak.upgrade() {
                    session.on_state_change(state).await;
                }
            })
        }));

        if let CandidateMode::Trickle(events) = &self.mode {
            let events = events.clone();
            let peer_id = session.peer_id().to_string();
            connection.on_local_candidate(Box::new(move |candidate: CandidateInit| {
                let event = SignalingEvent::Candidate {
                    peer_id: peer_id.clone(),
                    candidate,
                };
                if events.send(event).is_err() {
                    tracing::debug!("Candidate channel closed, dropping candidate for {}", peer_id);
                }
            }));
        }
    }

    async fn exchange(&self, session: &PeerSession, offer: String) -> anyhow::Result<String> {
        let connection = session.connection();

        connection
            .set_remote_offer(offer)
            .await
            .context("failed to set remote description")?;
        session.set_state(PeerState::Offered);

        let answer = connection
            .create_answer()
            .await
            .context("failed to create answer")?;

        connection
            .set_local_answer(answer.clone())
            .await
            .context("failed to set local description")?;
        session.set_state(PeerState::Answered);

        match &self.mode {
            CandidateMode::Trickle(_) => Ok(answer),
            CandidateMode::Gathered { timeout } => connection
                .gathered_local_description(*timeout)
                .await
                .context("failed to read local description"),
        }
    }

    /// Forward a remote ICE candidate to the peer's connection
    pub async fn add_candidate(
        &self,
        peer_id: &str,
        candidate: CandidateInit,
    ) -> Result<(), PeerError> {
        if peer_id.is_empty() {
            return Err(PeerError::MissingPeerId);
        }

        let session = self
            .registry
            .get(peer_id)
            .await
            .filter(|session| !session.is_closed())
            .ok_or_else(|| PeerError::NoSuchPeer(peer_id.to_string()))?;

        session
            .connection()
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| {
                // Torn down while the candidate was in flight
                if session.is_closed() {
                    PeerError::NoSuchPeer(peer_id.to_string())
                } else {
                    PeerError::InvalidCandidate(format!("{:#}", e))
                }
            })?;

        tracing::debug!("Added ICE candidate for peer {}", peer_id);
        Ok(())
    }

    /// Tear the peer down so its next offer starts a fresh session
    pub async fn restart(&self, peer_id: &str) -> Result<(), PeerError> {
        if peer_id.is_empty() {
            return Err(PeerError::MissingPeerId);
        }
        tracing::info!("Restart requested by peer {}", peer_id);
        self.registry.remove(peer_id).await
    }
}
