//! Request/response signaling over JSON RPC
//!
//! The caller blocks until the answer is ready, so there is no outbound
//! path: answers go back in the HTTP response and server candidates are
//! embedded in the answer SDP.

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use std::sync::Arc;

use rotcore_protocol::{Ack, Answer, Candidate, CandidateInit, Offer};

use super::{CandidateHandler, Handlers, OfferHandler, RestartHandler, SignalError, Signaler};
use crate::error::{AppError, Result};

pub const HANDSHAKE_PATH: &str = "/twirp/rtcservice.RTC/Handshake";
pub const NEW_CANDIDATE_PATH: &str = "/twirp/rtcservice.RTC/NewCandidate";

#[derive(Default)]
pub struct RpcBridge {
    handlers: Handlers,
}

impl RpcBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(HANDSHAKE_PATH, post(handshake))
            .route(NEW_CANDIDATE_PATH, post(new_candidate))
            .with_state(self.clone())
    }

    pub(crate) fn handlers(&self) -> &Handlers {
        &self.handlers
    }
}

#[async_trait]
impl Signaler for RpcBridge {
    fn register_offer_handler(&self, handler: OfferHandler) {
        self.handlers.set_offer(handler);
    }

    fn register_candidate_handler(&self, handler: CandidateHandler) {
        self.handlers.set_candidate(handler);
    }

    fn register_restart_handler(&self, handler: RestartHandler) {
        self.handlers.set_restart(handler);
    }

    async fn send_answer(&self, _peer_id: &str, _sdp: String) -> std::result::Result<(), SignalError> {
        Err(SignalError::Unsupported)
    }

    async fn send_candidate(
        &self,
        _peer_id: &str,
        _candidate: CandidateInit,
    ) -> std::result::Result<(), SignalError> {
        Err(SignalError::Unsupported)
    }
}

fn bad_request(rejection: JsonRejection) -> AppError {
    AppError::InvalidArgument(rejection.body_text())
}

fn no_handler() -> AppError {
    AppError::Internal(anyhow!("no handler registered"))
}

async fn handshake(
    State(bridge): State<Arc<RpcBridge>>,
    payload: std::result::Result<Json<Offer>, JsonRejection>,
) -> Result<Json<Answer>> {
    let Json(offer) = payload.map_err(bad_request)?;
    let handler = bridge.handlers.offer().ok_or_else(no_handler)?;

    let sdp = handler(offer.peer_id.clone(), offer.sdp).await?;

    Ok(Json(Answer {
        peer_id: offer.peer_id,
        sdp,
    }))
}

async fn new_candidate(
    State(bridge): State<Arc<RpcBridge>>,
    payload: std::result::Result<Json<Candidate>, JsonRejection>,
) -> Result<Json<Ack>> {
    let Json(candidate) = payload.map_err(bad_request)?;
    let handler = bridge.handlers.candidate().ok_or_else(no_handler)?;

    handler(candidate.peer_id.clone(), candidate.to_init()).await?;

    Ok(Json(Ack::ok()))
}
