use thiserror::Error;

/// Failures of peer negotiation and lookup
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Peer ID is required")]
    MissingPeerId,

    #[error("No such peer: {0}")]
    NoSuchPeer(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    #[error("Negotiation failed: {0:#}")]
    Negotiation(#[source] anyhow::Error),
}

impl PeerError {
    /// Whether the error is expected under normal peer churn
    pub fn is_not_found(&self) -> bool {
        matches!(self, PeerError::NoSuchPeer(_))
    }
}
