//! Peer Registry
//!
//! Concurrent keyed store of live peer sessions. Every insertion, lookup and
//! removal goes through these methods; connections are always closed after
//! the write lock has been released, since closing can re-enter engine
//! callbacks that need the registry again.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::PeerError;
use super::peer::PeerSession;

#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, Arc<PeerSession>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, returning the one it replaced (not yet closed)
    pub async fn add(&self, session: Arc<PeerSession>) -> Option<Arc<PeerSession>> {
        let peer_id = session.peer_id().to_string();
        let previous = self.peers.write().await.insert(peer_id.clone(), session);

        if previous.is_some() {
            tracing::info!("Replaced existing session for peer {}", peer_id);
        } else {
            tracing::info!("Added peer {}", peer_id);
        }

        previous
    }

    pub async fn get(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.peers.read().await.get(peer_id).cloned()
    }

    /// Remove a peer and close its connection
    pub async fn remove(&self, peer_id: &str) -> Result<(), PeerError> {
        let removed = self.peers.write().await.remove(peer_id);

        match removed {
            Some(session) => {
                session.close().await;
                tracing::info!("Removed peer {}", peer_id);
                Ok(())
            }
            None => Err(PeerError::NoSuchPeer(peer_id.to_string())),
        }
    }

    /// Remove `session` only if it is still the registered one for its peer,
    /// then close it either way
    pub async fn remove_session(&self, session: &PeerSession) {
        let removed = {
            let mut peers = self.peers.write().await;
            match peers.get(session.peer_id()) {
                Some(current) if current.serial() == session.serial() => {
                    peers.remove(session.peer_id())
                }
                _ => None,
            }
        };

        if removed.is_some() {
            tracing::info!("Removed peer {}", session.peer_id());
        } else {
            tracing::debug!(
                "Session {} of peer {} is no longer registered",
                session.serial(),
                session.peer_id()
            );
        }

        session.close().await;
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    pub async fn contains(&self, peer_id: &str) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    /// Drain the registry and close every session
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.peers.write().await.drain().map(|(_, s)| s).collect();

        if !sessions.is_empty() {
            tracing::info!("Closing {} peer connections", sessions.len());
        }

        for session in sessions {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sfu::testing::FakeConnection;
    use std::sync::Weak;
    use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

    fn session(
        registry: &Arc<PeerRegistry>,
        peer_id: &str,
        serial: u64,
    ) -> (Arc<PeerSession>, Arc<FakeConnection>) {
        let connection = Arc::new(FakeConnection::default());
        let session = Arc::new(PeerSession::new(
            peer_id.to_string(),
            serial,
            connection.clone(),
            Arc::downgrade(registry),
        ));
        (session, connection)
    }

    #[tokio::test]
    async fn add_then_get() {
        let registry = Arc::new(PeerRegistry::new());
        let (s, _) = session(&registry, "peer-1", 1);

        assert!(registry.add(s).await.is_none());
        let found = registry.get("peer-1").await.unwrap();
        assert_eq!(found.peer_id(), "peer-1");
        assert!(registry.get("peer-2").await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn add_returns_replaced_session() {
        let registry = Arc::new(PeerRegistry::new());
        let (first, _) = session(&registry, "peer-1", 1);
        let (second, _) = session(&registry, "peer-1", 2);

        registry.add(first).await;
        let previous = registry.add(second).await.unwrap();

        assert_eq!(previous.serial(), 1);
        assert_eq!(registry.get("peer-1").await.unwrap().serial(), 2);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn remove_closes_connection() {
        let registry = Arc::new(PeerRegistry::new());
        let (s, connection) = session(&registry, "peer-1", 1);
        registry.add(s.clone()).await;

        registry.remove("peer-1").await.unwrap();

        assert!(registry.is_empty().await);
        assert!(s.is_closed());
        assert_eq!(connection.close_count(), 1);
    }

    #[tokio::test]
    async fn remove_unknown_peer_is_not_found() {
        let registry = PeerRegistry::new();
        let err = registry.remove("ghost").await.unwrap_err();
        assert!(matches!(err, PeerError::NoSuchPeer(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn stale_session_does_not_evict_successor() {
        let registry = Arc::new(PeerRegistry::new());
        let (old, old_connection) = session(&registry, "peer-1", 1);
        let (new, new_connection) = session(&registry, "peer-1", 2);
        registry.add(old.clone()).await;
        registry.add(new).await;

        registry.remove_session(&old).await;

        assert_eq!(registry.get("peer-1").await.unwrap().serial(), 2);
        assert_eq!(old_connection.close_count(), 1);
        assert_eq!(new_connection.close_count(), 0);
    }

    #[tokio::test]
    async fn session_closes_once() {
        let registry = Arc::new(PeerRegistry::new());
        let (s, connection) = session(&registry, "peer-1", 1);
        registry.add(s.clone()).await;

        registry.remove_session(&s).await;
        registry.remove_session(&s).await;
        assert!(registry.remove("peer-1").await.is_err());

        assert_eq!(connection.close_count(), 1);
    }

    #[tokio::test]
    async fn close_all_drains() {
        let registry = Arc::new(PeerRegistry::new());
        let mut connections = Vec::new();
        for i in 0..3 {
            let (s, c) = session(&registry, &format!("peer-{i}"), i);
            registry.add(s).await;
            connections.push(c);
        }

        registry.close_all().await;

        assert!(registry.is_empty().await);
        assert!(connections.iter().all(|c| c.close_count() == 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_operations_on_one_peer_stay_consistent() {
        let registry = Arc::new(PeerRegistry::new());
        let mut handles = Vec::new();
        let mut connections = Vec::new();

        for i in 0..64u64 {
            let (s, c) = session(&registry, "peer-1", i);
            connections.push(c);
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                match i % 3 {
                    0 => {
                        if let Some(previous) = registry.add(s).await {
                            previous.close().await;
                        }
                    }
                    1 => {
                        let _ = registry.remove("peer-1").await;
                    }
                    _ => {
                        if let Some(found) = registry.get("peer-1").await {
                            assert_eq!(found.peer_id(), "peer-1");
                        }
                    }
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(registry.len().await <= 1);
        assert!(connections.iter().all(|c| c.close_count() <= 1));

        // The surviving entry, if any, is an open session
        if let Some(survivor) = registry.get("peer-1").await {
            assert!(!survivor.is_closed());
        }
    }

    #[tokio::test]
    async fn failed_ice_state_removes_session() {
        let registry = Arc::new(PeerRegistry::new());
        let (s, connection) = session(&registry, "peer-1", 1);
        registry.add(s.clone()).await;

        s.on_state_change(RTCIceConnectionState::Failed).await;

        assert!(registry.get("peer-1").await.is_none());
        assert_eq!(connection.close_count(), 1);
    }

    #[tokio::test]
    async fn failure_after_registry_dropped_still_closes() {
        let connection = Arc::new(FakeConnection::default());
        let s = PeerSession::new("peer-1".to_string(), 1, connection.clone(), Weak::new());

        s.on_state_change(RTCIceConnectionState::Failed).await;

        assert!(s.is_closed());
        assert_eq!(connection.close_count(), 1);
    }
}
