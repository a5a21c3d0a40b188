//! Media Track Relay
//!
//! Reads raw encoded media from UDP sources and writes it as timed samples
//! into one outbound track per source. Every peer shares the same track, so
//! a sample written here is fanned out to all of them by the engine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Duration of one Opus frame pushed by the audio source
pub const OPUS_FRAME_MS: u32 = 10;

/// Backoff between failed reads unless configured otherwise
pub const DEFAULT_READ_BACKOFF: Duration = Duration::from_secs(5);

const H264_BUFFER_SIZE: usize = 1024 * 512;
const OPUS_BUFFER_SIZE: usize = 1024;

/// Codec carried by a stream source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Opus,
    H264,
}

impl CodecKind {
    pub fn clock_rate(self) -> u32 {
        match self {
            CodecKind::Opus => 48000,
            CodecKind::H264 => 90000,
        }
    }

    pub fn codec_type(self) -> RTPCodecType {
        match self {
            CodecKind::Opus => RTPCodecType::Audio,
            CodecKind::H264 => RTPCodecType::Video,
        }
    }

    pub fn capability(self) -> RTCRtpCodecCapability {
        match self {
            CodecKind::Opus => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: self.clock_rate(),
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            CodecKind::H264 => RTCRtpCodecCapability {
                mime_type: "video/H264".to_string(),
                clock_rate: self.clock_rate(),
                channels: 0,
                sdp_fmtp_line:
                    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                        .to_string(),
                rtcp_feedback: vec![],
            },
        }
    }

    /// Codec registration for the media engine
    pub fn parameters(self) -> RTCRtpCodecParameters {
        RTCRtpCodecParameters {
            capability: self.capability(),
            payload_type: match self {
                CodecKind::Opus => 111,
                CodecKind::H264 => 102,
            },
            ..Default::default()
        }
    }

    /// Track ID and stream ID of the shared outbound track
    fn track_ids(self) -> (&'static str, &'static str) {
        match self {
            CodecKind::Opus => ("audio", "room-audio"),
            CodecKind::H264 => ("video", "room-video"),
        }
    }

    fn buffer_size(self) -> usize {
        match self {
            CodecKind::Opus => OPUS_BUFFER_SIZE,
            CodecKind::H264 => H264_BUFFER_SIZE,
        }
    }

    fn pacing(self) -> Pacing {
        match self {
            CodecKind::Opus => Pacing::FixedFrame {
                frame_ms: OPUS_FRAME_MS,
            },
            CodecKind::H264 => Pacing::Elapsed,
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Opus => f.write_str("opus"),
            CodecKind::H264 => f.write_str("h264"),
        }
    }
}

/// An external UDP media source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSource {
    pub address: String,
    pub codec: CodecKind,
}

/// How a datagram is converted into a sample duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Raw frame passthrough timed by wall clock between reads
    Elapsed,
    /// Fixed-size frames
    FixedFrame { frame_ms: u32 },
}

impl Pacing {
    pub fn samples(self, clock_rate: u32, elapsed: Duration) -> u32 {
        match self {
            Pacing::Elapsed => sample_count(clock_rate, elapsed.as_millis() as u64),
            Pacing::FixedFrame { frame_ms } => sample_count(clock_rate, u64::from(frame_ms)),
        }
    }
}

/// Samples covering `millis` at `clock_rate`: `clock_rate / 1000 * millis`
pub fn sample_count(clock_rate: u32, millis: u64) -> u32 {
    (u64::from(clock_rate / 1000) * millis).min(u64::from(u32::MAX)) as u32
}

/// Duration that the track converts back into exactly `samples` at `clock_rate`.
///
/// The track truncates `duration * clock_rate`, so the duration is the first
/// whole nanosecond strictly past the exact value. The overshoot stays under
/// one sample and above the float error of the conversion.
pub fn sample_duration(clock_rate: u32, samples: u32) -> Duration {
    if samples == 0 {
        return Duration::ZERO;
    }
    let nanos = u64::from(samples) * 1_000_000_000 / u64::from(clock_rate.max(1));
    Duration::from_nanos(nanos + 1)
}

/// Where the relay reads datagrams from
#[async_trait]
pub trait DatagramSource: Send + Sync {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<usize>;
}

#[async_trait]
impl DatagramSource for UdpSocket {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf).await
    }
}

/// Where the relay writes timed samples to
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn push_sample(&self, sample: &Sample) -> Result<()>;
}

#[async_trait]
impl SampleSink for TrackLocalStaticSample {
    async fn push_sample(&self, sample: &Sample) -> Result<()> {
        self.write_sample(sample).await?;
        Ok(())
    }
}

/// Read/write loop for a single stream source
pub struct RelayLoop<S, K: ?Sized> {
    label: String,
    codec: CodecKind,
    source: S,
    sink: Arc<K>,
    backoff: Duration,
}

impl<S, K> RelayLoop<S, K>
where
    S: DatagramSource,
    K: SampleSink + ?Sized,
{
    pub fn new(label: String, codec: CodecKind, source: S, sink: Arc<K>, backoff: Duration) -> Self {
        Self {
            label,
            codec,
            source,
            sink,
            backoff,
        }
    }

    /// Relay until `cancel` fires. Read failures are retried after the backoff.
    pub async fn run(self, cancel: CancellationToken) {
        let clock_rate = self.codec.clock_rate();
        let pacing = self.codec.pacing();
        let mut buf = vec![0u8; self.codec.buffer_size()];
        let mut sample_total = 0u64;

        tracing::info!("Starting {} relay from {}", self.codec, self.label);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let start = Instant::now();
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = self.source.recv_datagram(&mut buf) => read,
            };

            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(
                        "Stream read error on {}, trying again in {:?}: {}",
                        self.label,
                        self.backoff,
                        e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.backoff) => continue,
                    }
                }
            };

            let samples = pacing.samples(clock_rate, start.elapsed());
            let sample = Sample {
                data: Bytes::copy_from_slice(&buf[..n]),
                duration: sample_duration(clock_rate, samples),
                ..Default::default()
            };

            if let Err(e) = self.sink.push_sample(&sample).await {
                tracing::warn!("Failed to write sample from {}: {}", self.label, e);
                continue;
            }

            sample_total += 1;
            if sample_total % 1000 == 1 {
                tracing::debug!(
                    "Relayed sample {} from {} ({} bytes, {} samples)",
                    sample_total,
                    self.label,
                    n,
                    samples
                );
            }
        }

        tracing::info!("Stream {} stopping after {} samples", self.label, sample_total);
    }
}

/// A shared outbound track and the source feeding it
#[derive(Clone)]
pub struct RelayTrack {
    pub track: Arc<TrackLocalStaticSample>,
    pub source: StreamSource,
}

/// All configured relays: the track side table plus their bound sockets
pub struct MediaRelay {
    tracks: Vec<RelayTrack>,
    sockets: Vec<UdpSocket>,
    backoff: Duration,
}

impl MediaRelay {
    /// Create one track per source and bind its listening socket
    pub async fn bind(sources: &[StreamSource], backoff: Duration) -> Result<Self> {
        let mut tracks = Vec::with_capacity(sources.len());
        let mut sockets = Vec::with_capacity(sources.len());

        for source in sources {
            let socket = UdpSocket::bind(&source.address)
                .await
                .with_context(|| format!("failed to bind {} stream on {}", source.codec, source.address))?;

            tracing::info!(
                "Listening for {} on {}",
                source.codec,
                socket.local_addr()?
            );

            let (track_id, stream_id) = source.codec.track_ids();
            let track = Arc::new(TrackLocalStaticSample::new(
                source.codec.capability(),
                track_id.to_string(),
                stream_id.to_string(),
            ));

            tracks.push(RelayTrack {
                track,
                source: source.clone(),
            });
            sockets.push(socket);
        }

        Ok(Self {
            tracks,
            sockets,
            backoff,
        })
    }

    pub fn tracks(&self) -> &[RelayTrack] {
        &self.tracks
    }

    /// Tracks to attach to every new peer, in configuration order
    pub fn outbound_tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.tracks.iter().map(|t| t.track.clone()).collect()
    }

    /// Local addresses of the bound sockets, in configuration order
    pub fn local_addrs(&self) -> Vec<std::net::SocketAddr> {
        self.sockets
            .iter()
            .filter_map(|socket| socket.local_addr().ok())
            .collect()
    }

    /// Start one relay task per source. Sockets close when their task exits.
    pub fn spawn(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let backoff = self.backoff;
        self.tracks
            .into_iter()
            .zip(self.sockets)
            .map(|(relay, socket)| {
                let relay_loop = RelayLoop::new(
                    relay.source.address.clone(),
                    relay.source.codec,
                    socket,
                    relay.track,
                    backoff,
                );
                tokio::spawn(relay_loop.run(cancel.clone()))
            })
            .collect()
    }
}
