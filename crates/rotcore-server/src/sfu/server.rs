use futures_util::FutureExt;
use std::sync::Arc;

use rotcore_protocol::CandidateInit;

use super::engine::RtcEngine;
use super::error::PeerError;
use super::negotiator::{CandidateMode, Negotiator};
use super::registry::PeerRegistry;
use super::relay::RelayTrack;
use crate::signaling::Signaler;

/// Composition root of the SFU: relay tracks, peer registry and negotiator
pub struct SfuServer {
    negotiator: Negotiator,
}

impl SfuServer {
    pub fn new(engine: Arc<dyn RtcEngine>, tracks: Vec<RelayTrack>, mode: CandidateMode) -> Arc<Self> {
        let registry = Arc::new(PeerRegistry::new());
        Arc::new(Self {
            negotiator: Negotiator::new(engine, registry, tracks, mode),
        })
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        self.negotiator.registry()
    }

    pub async fn handshake(&self, peer_id: &str, offer: String) -> Result<String, PeerError> {
        self.negotiator.handshake(peer_id, offer).await
    }

    pub async fn new_candidate(
        &self,
        peer_id: &str,
        candidate: CandidateInit,
    ) -> Result<(), PeerError> {
        self.negotiator.add_candidate(peer_id, candidate).await
    }

    pub async fn restart(&self, peer_id: &str) -> Result<(), PeerError> {
        self.negotiator.restart(peer_id).await
    }

    /// Register the SFU entry points as the bridge's handlers
    pub fn attach(self: &Arc<Self>, signaler: &dyn Signaler) {
        let sfu = self.clone();
        signaler.register_offer_handler(Arc::new(move |peer_id: String, sdp: String| {
            let sfu = sfu.clone();
            async move { sfu.handshake(&peer_id, sdp).await }.boxed()
        }));

        let sfu = self.clone();
        signaler.register_candidate_handler(Arc::new(
            move |peer_id: String, candidate: CandidateInit| {
                let sfu = sfu.clone();
                async move { sfu.new_candidate(&peer_id, candidate).await }.boxed()
            },
        ));

        let sfu = self.clone();
        signaler.register_restart_handler(Arc::new(move |peer_id: String| {
            let sfu = sfu.clone();
            async move { sfu.restart(&peer_id).await }.boxed()
        }));

        signaler.register_join_handler(Arc::new(|peer_id: String| {
            async move { tracing::debug!("Peer {} may now send an offer", peer_id) }.boxed()
        }));
    }

    /// Close every peer connection
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down SFU");
        self.registry().close_all().await;
    }
}
