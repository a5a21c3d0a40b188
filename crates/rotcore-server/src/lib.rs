//! Rotcore Server Library
//!
//! WebRTC SFU that relays media from UDP sources to every negotiated peer.
//! This module exposes the server components for testing and embedding.

pub mod api;
pub mod auth;
pub mod error;
pub mod sfu;
pub mod signaling;
pub mod state;

use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use auth::Secret;
use sfu::{CandidateMode, MediaRelay, RtcEngine, SfuServer, WebRtcEngine};
use signaling::{Bridge, SignalingMode};
use state::{AppState, Config};

/// A configured server, ready to be served
pub struct App {
    pub router: Router,
    pub state: AppState,
    /// Relay loops and the outbound event forwarder
    pub tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Close every peer and wait for background tasks; `cancel` must already be triggered
    pub async fn shutdown(self) {
        self.state.sfu.shutdown().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }
    }
}

/// Create and configure the server application with the webrtc-rs engine
pub async fn create_app(config: Config, cancel: CancellationToken) -> Result<App> {
    let engine = Arc::new(WebRtcEngine::new(&config.engine_settings())?);
    create_app_with_engine(config, engine, cancel).await
}

/// Create the application around an arbitrary engine
pub async fn create_app_with_engine(
    config: Config,
    engine: Arc<dyn RtcEngine>,
    cancel: CancellationToken,
) -> Result<App> {
    let secret = match config.signaling.mode {
        SignalingMode::Rpc => Some(Arc::new(Secret::load(&config.secret_path)?)),
        SignalingMode::Socket => None,
    };

    let relay = MediaRelay::bind(&config.streams, config.read_backoff()).await?;
    let tracks = relay.tracks().to_vec();
    let mut tasks = relay.spawn(cancel.clone());

    let bridge = Bridge::new(config.signaling.mode, cancel.clone());
    let mode = match &bridge {
        Bridge::Rpc(_) => CandidateMode::Gathered {
            timeout: config.gather_timeout(),
        },
        Bridge::Socket(_) => {
            let (events, rx) = mpsc::unbounded_channel();
            tasks.push(signaling::spawn_event_forwarder(
                rx,
                Arc::new(bridge.clone()),
                cancel.clone(),
            ));
            CandidateMode::Trickle(events)
        }
    };

    let sfu = SfuServer::new(engine, tracks, mode);
    sfu.attach(&bridge);

    tracing::info!("Signaling over {}", bridge.mode());

    let router = api::create_router(&bridge, secret);
    let state = AppState {
        config: Arc::new(config),
        sfu,
        bridge,
    };

    Ok(App {
        router,
        state,
        tasks,
    })
}

/// Serve `router` until `cancel` fires, then give in-flight requests `grace`
/// to finish. Connections still open after that are abandoned to the runtime.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<()> {
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!("Requests still in flight after {:?}, closing connections", grace);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use tokio::sync::Notify;
    use tokio::time::Instant;

    #[tokio::test]
    async fn serve_stops_after_grace_with_request_in_flight() {
        let entered = Arc::new(Notify::new());
        let notify = entered.clone();
        let router = Router::new().route(
            "/hang",
            get(move || {
                let notify = notify.clone();
                async move {
                    notify.notify_one();
                    std::future::pending::<()>().await;
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let grace = Duration::from_millis(100);
        let server = tokio::spawn(serve(listener, router, cancel.clone(), grace));

        let client = tokio::spawn(async move { reqwest::get(format!("http://{addr}/hang")).await });
        entered.notified().await;

        let started = Instant::now();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("server kept waiting for the hung request")
            .unwrap()
            .unwrap();
        assert!(started.elapsed() >= grace);

        client.abort();
    }

    #[tokio::test]
    async fn serve_returns_promptly_when_idle() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(
            listener,
            Router::new(),
            cancel.clone(),
            Duration::from_secs(30),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("idle server did not stop")
            .unwrap()
            .unwrap();
    }
}
