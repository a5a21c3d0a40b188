//! HMAC request authentication for the RPC surface
//!
//! Callers send a token in `Rot-Token` and the lowercase hex HMAC-SHA256 of
//! that token, keyed by the shared secret, in `Rot-Authorization`.

use anyhow::{bail, Context};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub const TOKEN_HEADER: &str = "Rot-Token";
pub const AUTHORIZATION_HEADER: &str = "Rot-Authorization";

const MISSING_TOKEN: &str = "Missing token";
const MISSING_AUTH: &str = "Missing auth";

/// Shared secret for request signatures
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Read the secret from `path`, trimming surrounding whitespace
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read secret file {}", path.display()))?;

        let secret = contents.trim();
        if secret.is_empty() {
            bail!("secret file {} is empty", path.display());
        }

        Ok(Self(secret.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Expected `Rot-Authorization` value for `token`
pub fn sign(token: &str, secret: &Secret) -> anyhow::Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_str().as_bytes())
        .map_err(|e| anyhow::anyhow!("Failed to create HMAC: {e}"))?;

    mac.update(token.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn forbidden(message: &'static str) -> Response {
    (StatusCode::FORBIDDEN, message).into_response()
}

/// Middleware rejecting requests without a valid signature
pub async fn require_signature(
    State(secret): State<Arc<Secret>>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();

    let Some(token) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) else {
        tracing::debug!("Rejected request without token");
        return forbidden(MISSING_TOKEN);
    };

    let Some(provided) = headers.get(AUTHORIZATION_HEADER) else {
        tracing::debug!("Rejected request without auth hash");
        return forbidden(MISSING_AUTH);
    };

    let expected = match sign(token, &secret) {
        Ok(expected) => expected,
        Err(e) => {
            tracing::error!("Failed to sign token: {:#}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        tracing::warn!("Rejected request with invalid auth hash");
        return forbidden(MISSING_AUTH);
    }

    next.run(request).await
}
