//! WebRTC engine seam
//!
//! The negotiator only talks to peer connections through [`RtcEngine`] and
//! [`RtcConnection`]. [`WebRtcEngine`] backs them with webrtc-rs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use rotcore_protocol::CandidateInit;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::relay::CodecKind;

/// Invoked by the engine on every ICE connection state transition
pub type IceStateHandler =
    Box<dyn Fn(RTCIceConnectionState) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked by the engine for every locally gathered ICE candidate
pub type LocalCandidateHandler = Box<dyn Fn(CandidateInit) + Send + Sync>;

/// One peer connection inside the WebRTC engine
#[async_trait]
pub trait RtcConnection: Send + Sync {
    fn on_ice_state_change(&self, handler: IceStateHandler);

    fn on_local_candidate(&self, handler: LocalCandidateHandler);

    /// Attach an outbound track, send-only
    async fn add_send_track(&self, track: Arc<TrackLocalStaticSample>) -> Result<()>;

    async fn set_remote_offer(&self, sdp: String) -> Result<()>;

    async fn create_answer(&self) -> Result<String>;

    async fn set_local_answer(&self, sdp: String) -> Result<()>;

    /// Local description once ICE gathering finished, or once `wait` elapsed
    async fn gathered_local_description(&self, wait: Duration) -> Result<String>;

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Factory for peer connections
#[async_trait]
pub trait RtcEngine: Send + Sync {
    async fn new_connection(&self) -> Result<Arc<dyn RtcConnection>>;
}

/// Transport settings for the webrtc-rs engine
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// Public IPs advertised as host candidates (1:1 NAT)
    pub public_ips: Vec<String>,
    /// Inclusive UDP port range for ICE
    pub port_range: Option<(u16, u16)>,
    pub stun_servers: Vec<String>,
    pub ice_lite: bool,
}

/// webrtc-rs backed engine
pub struct WebRtcEngine {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcEngine {
    pub fn new(settings: &EngineSettings) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        for codec in [CodecKind::H264, CodecKind::Opus] {
            media_engine.register_codec(codec.parameters(), codec.codec_type())?;
        }

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_lite(settings.ice_lite);
        if !settings.public_ips.is_empty() {
            setting_engine
                .set_nat_1to1_ips(settings.public_ips.clone(), RTCIceCandidateType::Host);
        }
        if let Some((min, max)) = settings.port_range {
            let ephemeral =
                EphemeralUDP::new(min, max).context("invalid ICE port range")?;
            setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let ice_servers = settings
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        tracing::info!(
            "WebRTC engine ready (ICE lite: {}, public IPs: {:?})",
            settings.ice_lite,
            settings.public_ips
        );

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl RtcEngine for WebRtcEngine {
    async fn new_connection(&self) -> Result<Arc<dyn RtcConnection>> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = self.api.new_peer_connection(config).await?;

        Ok(Arc::new(WebRtcConnection {
            peer_connection: Arc::new(peer_connection),
            gathering: Mutex::new(None),
        }))
    }
}

/// webrtc-rs peer connection
pub struct WebRtcConnection {
    peer_connection: Arc<RTCPeerConnection>,
    /// Resolves when ICE gathering completes; armed before the local answer is applied
    gathering: Mutex<Option<mpsc::Receiver<()>>>,
}

#[async_trait]
impl RtcConnection for WebRtcConnection {
    fn on_ice_state_change(&self, handler: IceStateHandler) {
        self.peer_connection
            .on_ice_connection_state_change(Box::new(move |state| handler(state)));
    }

    fn on_local_candidate(&self, handler: LocalCandidateHandler) {
        let handler = Arc::new(handler);
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let handler = handler.clone();
                Box::pin(async move {
                    // `None` marks the end of gathering
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => handler(CandidateInit {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }),
                        Err(e) => tracing::warn!("Failed to serialize local candidate: {}", e),
                    }
                })
            }));
    }

    async fn add_send_track(&self, track: Arc<TrackLocalStaticSample>) -> Result<()> {
        let transceiver = self
            .peer_connection
            .add_transceiver_from_track(
                track as Arc<dyn TrackLocal + Send + Sync>,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await?;

        // Incoming RTCP must be drained for the interceptors (NACK, reports) to run
        let sender = transceiver.sender().await;
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        Ok(())
    }

    async fn set_remote_offer(&self, sdp: String) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp)?;
        self.peer_connection.set_remote_description(offer).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(answer.sdp)
    }

    async fn set_local_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)?;
        let gathering = self.peer_connection.gathering_complete_promise().await;
        *self.gathering.lock().await = Some(gathering);
        self.peer_connection.set_local_description(answer).await?;
        Ok(())
    }

    async fn gathered_local_description(&self, wait: Duration) -> Result<String> {
        if let Some(mut gathering) = self.gathering.lock().await.take() {
            if tokio::time::timeout(wait, gathering.recv()).await.is_err() {
                tracing::warn!(
                    "ICE gathering did not complete within {:?}, answering with partial candidates",
                    wait
                );
            }
        }

        self.peer_connection
            .local_description()
            .await
            .map(|description| description.sdp)
            .context("no local description set")
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}
