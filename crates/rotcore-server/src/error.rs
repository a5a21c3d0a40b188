use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rotcore_protocol::{ErrorCode, RpcError};
use thiserror::Error;

use crate::sfu::PeerError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<PeerError> for AppError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::MissingPeerId | PeerError::InvalidCandidate(_) => {
                AppError::InvalidArgument(err.to_string())
            }
            PeerError::NoSuchPeer(_) => AppError::NotFound("No such peer by that ID".to_string()),
            PeerError::Negotiation(e) => AppError::Internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => {
                tracing::debug!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, msg.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(RpcError {
            code: self.code(),
            msg,
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
