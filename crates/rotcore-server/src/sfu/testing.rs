//! In-memory engine for negotiator and registry tests

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use rotcore_protocol::CandidateInit;

use super::engine::{IceStateHandler, LocalCandidateHandler, RtcConnection, RtcEngine};

pub const FAKE_ANSWER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=ice-lite\r\n";

/// Negotiation step a [`FakeConnection`] can be told to fail at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    AddTrack,
    SetRemote,
    CreateAnswer,
    SetLocal,
    AddCandidate,
    /// ICE fails while a remote candidate is being applied
    IceDuringCandidate,
}

#[derive(Default)]
pub struct FakeConnection {
    fail_at: Option<FailAt>,
    closes: AtomicUsize,
    tracks: AtomicUsize,
    remote_offer: Mutex<Option<String>>,
    candidates: Mutex<Vec<CandidateInit>>,
    ice_handler: Mutex<Option<Arc<IceStateHandler>>>,
    candidate_handler: Mutex<Option<LocalCandidateHandler>>,
}

impl FakeConnection {
    pub fn failing_at(fail_at: Option<FailAt>) -> Self {
        Self {
            fail_at,
            ..Default::default()
        }
    }

    fn check(&self, step: FailAt) -> Result<()> {
        if self.fail_at == Some(step) {
            bail!("injected failure at {:?}", step);
        }
        Ok(())
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.load(Ordering::SeqCst)
    }

    pub fn remote_offer(&self) -> Option<String> {
        self.remote_offer.lock().clone()
    }

    pub fn candidates(&self) -> Vec<CandidateInit> {
        self.candidates.lock().clone()
    }

    /// Fire the registered ICE state callback as the engine would
    pub async fn emit_ice_state(&self, state: RTCIceConnectionState) {
        let handler = self.ice_handler.lock().clone();
        if let Some(handler) = handler {
            handler(state).await;
        }
    }

    /// Fire the registered local candidate callback
    pub fn emit_local_candidate(&self, candidate: CandidateInit) {
        if let Some(handler) = self.candidate_handler.lock().as_ref() {
            handler(candidate);
        }
    }
}

#[async_trait]
impl RtcConnection for FakeConnection {
    fn on_ice_state_change(&self, handler: IceStateHandler) {
        *self.ice_handler.lock() = Some(Arc::new(handler));
    }

    fn on_local_candidate(&self, handler: LocalCandidateHandler) {
        *self.candidate_handler.lock() = Some(handler);
    }

    async fn add_send_track(&self, _track: Arc<TrackLocalStaticSample>) -> Result<()> {
        self.check(FailAt::AddTrack)?;
        self.tracks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_remote_offer(&self, sdp: String) -> Result<()> {
        self.check(FailAt::SetRemote)?;
        *self.remote_offer.lock() = Some(sdp);
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        self.check(FailAt::CreateAnswer)?;
        Ok(FAKE_ANSWER.to_string())
    }

    async fn set_local_answer(&self, _sdp: String) -> Result<()> {
        self.check(FailAt::SetLocal)
    }

    async fn gathered_local_description(&self, _wait: Duration) -> Result<String> {
        Ok(format!("{}a=candidate:1 1 udp 1 127.0.0.1 11000 typ host\r\n", FAKE_ANSWER))
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<()> {
        self.check(FailAt::AddCandidate)?;
        if self.fail_at == Some(FailAt::IceDuringCandidate) {
            self.emit_ice_state(RTCIceConnectionState::Failed).await;
            bail!("peer connection closed");
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine handing out [`FakeConnection`]s and remembering each of them
#[derive(Default)]
pub struct FakeEngine {
    fail_at: Mutex<Option<FailAt>>,
    refuse_connections: bool,
    created: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse_connections: true,
            ..Default::default()
        })
    }

    /// Make every connection created from now on fail at `step`
    pub fn fail_at(&self, step: Option<FailAt>) {
        *self.fail_at.lock() = step;
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Arc<FakeConnection> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no connection created yet")
    }
}

#[async_trait]
impl RtcEngine for FakeEngine {
    async fn new_connection(&self) -> Result<Arc<dyn RtcConnection>> {
        if self.refuse_connections {
            bail!("engine refused to create a connection");
        }
        let connection = Arc::new(FakeConnection::failing_at(*self.fail_at.lock()));
        self.created.lock().push(connection.clone());
        Ok(connection)
    }
}
