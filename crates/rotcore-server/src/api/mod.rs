use crate::auth::{self, Secret};
use crate::signaling::Bridge;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP surface: health check plus the bridge's signaling routes.
/// RPC routes sit behind the signature gate when a secret is given.
pub fn create_router(bridge: &Bridge, secret: Option<Arc<Secret>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut signaling = bridge.router();
    if let (Bridge::Rpc(_), Some(secret)) = (bridge, secret) {
        signaling = signaling.layer(middleware::from_fn_with_state(
            secret,
            auth::require_signature,
        ));
    }

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        .merge(signaling)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
