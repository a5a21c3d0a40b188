//! Push signaling over WebSocket
//!
//! Every socket is one signaling session whose UUID doubles as the peer ID.
//! Inbound events from all sockets funnel into one ordered channel drained
//! by a single dispatcher task, so handlers never run concurrently. Answers
//! and candidates travel back through the session's writer channel; while an
//! offer is in flight its session holds outbound candidates until the answer
//! has been queued.

pub mod connections;
mod handler;

use async_trait::async_trait;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rotcore_protocol::{CandidateInit, ClientEvent, ServerEvent, SessionDescription};

use super::{
    CandidateHandler, Handlers, JoinHandler, OfferHandler, RestartHandler, SignalError, Signaler,
};
use connections::SessionTable;

pub const SOCKET_PATH: &str = "/ws";

/// Input of the dispatcher, in arrival order
#[derive(Debug)]
pub(crate) enum Inbound {
    Join(Uuid),
    Event(Uuid, ClientEvent),
    Leave(Uuid),
}

pub struct SocketBridge {
    handlers: Arc<Handlers>,
    sessions: Arc<SessionTable>,
    inbound: mpsc::UnboundedSender<Inbound>,
    cancel: CancellationToken,
}

impl SocketBridge {
    /// Create the bridge and spawn its dispatcher
    pub fn start(cancel: CancellationToken) -> Arc<Self> {
        let handlers = Arc::new(Handlers::default());
        let sessions = Arc::new(SessionTable::new());
        let (inbound, rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            handlers: handlers.clone(),
            sessions: sessions.clone(),
        };
        tokio::spawn(dispatcher.run(rx, cancel.clone()));

        Arc::new(Self {
            handlers,
            sessions,
            inbound,
            cancel,
        })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(SOCKET_PATH, get(handler::ws_handler))
            .with_state(self.clone())
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub(crate) fn push(&self, inbound: Inbound) {
        if self.inbound.send(inbound).is_err() {
            tracing::debug!("Signaling dispatcher stopped, dropping inbound event");
        }
    }

    fn session_id(peer_id: &str) -> Result<Uuid, SignalError> {
        Uuid::parse_str(peer_id).map_err(|_| SignalError::SessionGone(peer_id.to_string()))
    }
}

#[async_trait]
impl Signaler for SocketBridge {
    fn register_offer_handler(&self, handler: OfferHandler) {
        self.handlers.set_offer(handler);
    }

    fn register_candidate_handler(&self, handler: CandidateHandler) {
        self.handlers.set_candidate(handler);
    }

    fn register_restart_handler(&self, handler: RestartHandler) {
        self.handlers.set_restart(handler);
    }

    fn register_join_handler(&self, handler: JoinHandler) {
        self.handlers.set_join(handler);
    }

    async fn send_answer(&self, peer_id: &str, sdp: String) -> Result<(), SignalError> {
        let answer = ServerEvent::Answer(SessionDescription::answer(sdp));
        self.sessions
            .release(Self::session_id(peer_id)?, &answer)
            .await
    }

    async fn send_candidate(
        &self,
        peer_id: &str,
        candidate: CandidateInit,
    ) -> Result<(), SignalError> {
        self.sessions
            .send(Self::session_id(peer_id)?, &ServerEvent::Candidate(candidate))
            .await
    }
}

/// Single consumer of the inbound channel
struct Dispatcher {
    handlers: Arc<Handlers>,
    sessions: Arc<SessionTable>,
}

impl Dispatcher {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Inbound>, cancel: CancellationToken) {
        loop {
            let inbound = tokio::select! {
                _ = cancel.cancelled() => break,
                inbound = rx.recv() => match inbound {
                    Some(inbound) => inbound,
                    None => break,
                },
            };

            match inbound {
                Inbound::Join(session_id) => self.on_join(session_id).await,
                Inbound::Event(session_id, event) => self.on_event(session_id, event).await,
                Inbound::Leave(session_id) => self.on_leave(session_id).await,
            }
        }

        tracing::debug!("Signaling dispatcher stopped");
    }

    async fn on_join(&self, session_id: Uuid) {
        tracing::info!("Session {} joined", session_id);
        if let Some(handler) = self.handlers.join() {
            handler(session_id.to_string()).await;
        }
    }

    async fn on_event(&self, session_id: Uuid, event: ClientEvent) {
        let peer_id = session_id.to_string();

        match event {
            ClientEvent::Offer(offer) => {
                let Some(handler) = self.handlers.offer() else {
                    tracing::warn!("No offer handler registered, dropping offer from {}", peer_id);
                    return;
                };

                // Candidates trickled during the handshake must not overtake the answer
                self.sessions.hold(session_id).await;

                let sent = match handler(peer_id.clone(), offer.sdp).await {
                    Ok(answer) => {
                        let reply = ServerEvent::Answer(SessionDescription::answer(answer));
                        self.sessions.release(session_id, &reply).await
                    }
                    Err(e) => {
                        tracing::warn!("Offer from {} failed: {}", peer_id, e);
                        let reply = ServerEvent::Error {
                            message: e.to_string(),
                        };
                        self.sessions.reject(session_id, &reply).await
                    }
                };

                if let Err(e) = sent {
                    tracing::warn!("Failed to reply to {}: {}", peer_id, e);
                }
            }
            ClientEvent::Answer(_) => {
                tracing::debug!("Ignoring answer from {}", peer_id);
            }
            ClientEvent::Candidate(candidate) => {
                let Some(handler) = self.handlers.candidate() else {
                    tracing::warn!("No candidate handler registered, dropping candidate");
                    return;
                };

                if let Err(e) = handler(peer_id.clone(), candidate).await {
                    tracing::warn!("Candidate from {} rejected: {}", peer_id, e);
                    let reply = ServerEvent::Error {
                        message: e.to_string(),
                    };
                    if let Err(e) = self.sessions.send(session_id, &reply).await {
                        tracing::warn!("Failed to reply to {}: {}", peer_id, e);
                    }
                }
            }
            ClientEvent::Restart => self.restart(&peer_id).await,
        }
    }

    async fn on_leave(&self, session_id: Uuid) {
        tracing::info!("Session {} left", session_id);
        self.sessions.remove(session_id).await;
        self.restart(&session_id.to_string()).await;
    }

    async fn restart(&self, peer_id: &str) {
        let Some(handler) = self.handlers.restart() else {
            return;
        };

        match handler(peer_id.to_string()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => tracing::debug!("Restart of {}: {}", peer_id, e),
            Err(e) => tracing::warn!("Restart of {} failed: {}", peer_id, e),
        }
    }
}
