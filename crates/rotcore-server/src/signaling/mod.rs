//! Signaling Bridge
//!
//! Carries offers, answers and ICE candidates between clients and the SFU.
//! Two transports implement [`Signaler`]: a request/response RPC surface and
//! a push channel over WebSocket. One of them is picked at startup.

pub mod rpc;
pub mod socket;

use async_trait::async_trait;
use axum::Router;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rotcore_protocol::{CandidateInit, SignalingEvent};

use crate::sfu::PeerError;

pub use rpc::RpcBridge;
pub use socket::SocketBridge;

/// Handles an SDP offer, resolving to the SDP answer
pub type OfferHandler =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, Result<String, PeerError>> + Send + Sync>;

/// Handles a remote ICE candidate
pub type CandidateHandler = Arc<
    dyn Fn(String, CandidateInit) -> BoxFuture<'static, Result<(), PeerError>> + Send + Sync,
>;

/// Handles a request to tear down a peer
pub type RestartHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<(), PeerError>> + Send + Sync>;

/// Notified once when a push session opens
pub type JoinHandler = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Transport cannot push messages to clients")]
    Unsupported,

    #[error("Session {0} is gone")]
    SessionGone(String),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Transport-agnostic signaling capability
#[async_trait]
pub trait Signaler: Send + Sync {
    fn register_offer_handler(&self, handler: OfferHandler);

    fn register_candidate_handler(&self, handler: CandidateHandler);

    fn register_restart_handler(&self, handler: RestartHandler);

    fn register_join_handler(&self, _handler: JoinHandler) {}

    async fn send_answer(&self, peer_id: &str, sdp: String) -> Result<(), SignalError>;

    async fn send_candidate(
        &self,
        peer_id: &str,
        candidate: CandidateInit,
    ) -> Result<(), SignalError>;
}

/// Registered handler closures, shared by both transports
#[derive(Default)]
pub struct Handlers {
    offer: RwLock<Option<OfferHandler>>,
    candidate: RwLock<Option<CandidateHandler>>,
    restart: RwLock<Option<RestartHandler>>,
    join: RwLock<Option<JoinHandler>>,
}

impl Handlers {
    pub fn set_offer(&self, handler: OfferHandler) {
        *self.offer.write() = Some(handler);
    }

    pub fn set_candidate(&self, handler: CandidateHandler) {
        *self.candidate.write() = Some(handler);
    }

    pub fn set_restart(&self, handler: RestartHandler) {
        *self.restart.write() = Some(handler);
    }

    pub fn set_join(&self, handler: JoinHandler) {
        *self.join.write() = Some(handler);
    }

    pub fn offer(&self) -> Option<OfferHandler> {
        self.offer.read().clone()
    }

    pub fn candidate(&self) -> Option<CandidateHandler> {
        self.candidate.read().clone()
    }

    pub fn restart(&self) -> Option<RestartHandler> {
        self.restart.read().clone()
    }

    pub fn join(&self) -> Option<JoinHandler> {
        self.join.read().clone()
    }
}

/// Signaling transport selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalingMode {
    #[default]
    Rpc,
    Socket,
}

impl fmt::Display for SignalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingMode::Rpc => f.write_str("rpc"),
            SignalingMode::Socket => f.write_str("socket"),
        }
    }
}

/// The signaling transport in use, fixed for the process lifetime
#[derive(Clone)]
pub enum Bridge {
    Rpc(Arc<RpcBridge>),
    Socket(Arc<SocketBridge>),
}

impl Bridge {
    pub fn new(mode: SignalingMode, cancel: CancellationToken) -> Self {
        match mode {
            SignalingMode::Rpc => Bridge::Rpc(Arc::new(RpcBridge::new())),
            SignalingMode::Socket => Bridge::Socket(SocketBridge::start(cancel)),
        }
    }

    pub fn mode(&self) -> SignalingMode {
        match self {
            Bridge::Rpc(_) => SignalingMode::Rpc,
            Bridge::Socket(_) => SignalingMode::Socket,
        }
    }

    /// Routes served by this transport
    pub fn router(&self) -> Router {
        match self {
            Bridge::Rpc(bridge) => bridge.router(),
            Bridge::Socket(bridge) => bridge.router(),
        }
    }

    fn inner(&self) -> &dyn Signaler {
        match self {
            Bridge::Rpc(bridge) => bridge.as_ref() as &dyn Signaler,
            Bridge::Socket(bridge) => bridge.as_ref() as &dyn Signaler,
        }
    }
}

#[async_trait]
impl Signaler for Bridge {
    fn register_offer_handler(&self, handler: OfferHandler) {
        self.inner().register_offer_handler(handler);
    }

    fn register_candidate_handler(&self, handler: CandidateHandler) {
        self.inner().register_candidate_handler(handler);
    }

    fn register_restart_handler(&self, handler: RestartHandler) {
        self.inner().register_restart_handler(handler);
    }

    fn register_join_handler(&self, handler: JoinHandler) {
        self.inner().register_join_handler(handler);
    }

    async fn send_answer(&self, peer_id: &str, sdp: String) -> Result<(), SignalError> {
        self.inner().send_answer(peer_id, sdp).await
    }

    async fn send_candidate(
        &self,
        peer_id: &str,
        candidate: CandidateInit,
    ) -> Result<(), SignalError> {
        self.inner().send_candidate(peer_id, candidate).await
    }
}

/// Drain outbound signaling events into `signaler` until cancelled
pub fn spawn_event_forwarder(
    mut events: mpsc::UnboundedReceiver<SignalingEvent>,
    signaler: Arc<dyn Signaler>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let peer_id = event.peer_id().to_string();
            let result = match event {
                SignalingEvent::Candidate { peer_id, candidate } => {
                    signaler.send_candidate(&peer_id, candidate).await
                }
                SignalingEvent::Answer { peer_id, sdp } => signaler.send_answer(&peer_id, sdp).await,
                SignalingEvent::Offer { .. } => {
                    tracing::warn!("Dropping outbound offer for {}", peer_id);
                    continue;
                }
            };

            if let Err(e) = result {
                tracing::warn!("Failed to deliver signaling event to {}: {}", peer_id, e);
            }
        }

        tracing::debug!("Signaling event forwarder stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSignaler {
        candidates: Mutex<Vec<(String, CandidateInit)>>,
        answers: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Signaler for RecordingSignaler {
        fn register_offer_handler(&self, _handler: OfferHandler) {}
        fn register_candidate_handler(&self, _handler: CandidateHandler) {}
        fn register_restart_handler(&self, _handler: RestartHandler) {}

        async fn send_answer(&self, peer_id: &str, sdp: String) -> Result<(), SignalError> {
            self.answers.lock().push((peer_id.to_string(), sdp));
            Ok(())
        }

        async fn send_candidate(
            &self,
            peer_id: &str,
            candidate: CandidateInit,
        ) -> Result<(), SignalError> {
            if peer_id == "gone" {
                return Err(SignalError::SessionGone(peer_id.to_string()));
            }
            self.candidates.lock().push((peer_id.to_string(), candidate));
            Ok(())
        }
    }

    #[tokio::test]
    async fn forwarder_delivers_events_in_order() {
        let signaler = Arc::new(RecordingSignaler::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_event_forwarder(rx, signaler.clone(), CancellationToken::new());

        for i in 0..3 {
            tx.send(SignalingEvent::Candidate {
                peer_id: "peer-1".to_string(),
                candidate: CandidateInit {
                    candidate: format!("candidate:{i}"),
                    ..Default::default()
                },
            })
            .unwrap();
        }
        tx.send(SignalingEvent::Answer {
            peer_id: "peer-1".to_string(),
            sdp: "v=0".to_string(),
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let candidates = signaler.candidates.lock();
        let order: Vec<_> = candidates.iter().map(|(_, c)| c.candidate.as_str()).collect();
        assert_eq!(order, ["candidate:0", "candidate:1", "candidate:2"]);
        assert_eq!(signaler.answers.lock().len(), 1);
    }

    #[tokio::test]
    async fn forwarder_survives_delivery_failures() {
        let signaler = Arc::new(RecordingSignaler::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_event_forwarder(rx, signaler.clone(), CancellationToken::new());

        for peer_id in ["gone", "peer-1"] {
            tx.send(SignalingEvent::Candidate {
                peer_id: peer_id.to_string(),
                candidate: CandidateInit::default(),
            })
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(signaler.candidates.lock().len(), 1);
    }

    #[tokio::test]
    async fn forwarder_stops_on_cancellation() {
        let signaler = Arc::new(RecordingSignaler::default());
        let (_tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_event_forwarder(rx, signaler, cancel.clone());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn signaling_mode_parses_lowercase() {
        let mode: SignalingMode = serde_json::from_str("\"socket\"").unwrap();
        assert_eq!(mode, SignalingMode::Socket);
        assert_eq!(SignalingMode::default().to_string(), "rpc");
    }
}
