use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{CandidateInit, SessionDescription};

/// `Handshake` request: a peer's SDP offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    #[serde(default)]
    pub peer_id: String,
    #[serde(default)]
    pub sdp: String,
}

/// `Handshake` response: the server's SDP answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub peer_id: String,
    pub sdp: String,
}

/// `NewCandidate` request: a trickled ICE candidate from a peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub peer_id: String,
    #[serde(default)]
    pub sdp_mid: String,
    #[serde(default)]
    pub sdp_m_line_index: u16,
    #[serde(default)]
    pub candidate: String,
    #[serde(default)]
    pub username_fragment: String,
}

impl Candidate {
    pub fn to_init(&self) -> CandidateInit {
        CandidateInit {
            candidate: self.candidate.clone(),
            sdp_mid: (!self.sdp_mid.is_empty()).then(|| self.sdp_mid.clone()),
            sdp_m_line_index: Some(self.sdp_m_line_index),
            username_fragment: (!self.username_fragment.is_empty())
                .then(|| self.username_fragment.clone()),
        }
    }
}

/// `NewCandidate` response
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ack {
    pub ok: u32,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: 1 }
    }
}

/// Twirp-style error codes returned by the RPC surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    PermissionDenied,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::NotFound => "not_found",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body returned by RPC calls
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code}: {msg}")]
pub struct RpcError {
    pub code: ErrorCode,
    pub msg: String,
}

/// Events sent from client to server over the WebSocket bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "lowercase")]
pub enum ClientEvent {
    /// SDP offer starting (or replacing) the client's session
    Offer(SessionDescription),

    /// SDP answer; the server never offers, so this is only logged
    Answer(SessionDescription),

    /// Trickled ICE candidate
    Candidate(CandidateInit),

    /// Tear down the current session so a fresh offer can follow
    Restart,
}

/// Events sent from server to client over the WebSocket bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "lowercase")]
pub enum ServerEvent {
    /// Session established; `session_id` is the peer ID used for signaling
    Joined { session_id: Uuid },

    /// Answer to the client's offer
    Answer(SessionDescription),

    /// ICE candidate gathered by the server
    Candidate(CandidateInit),

    /// A request could not be handled
    Error { message: String },
}
