use rotcore_protocol::ServerEvent;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::signaling::SignalError;

struct Session {
    sender: mpsc::UnboundedSender<String>,
    /// Events queued while an offer waits for its answer
    held: Option<Vec<String>>,
}

impl Session {
    fn deliver(&self, session_id: Uuid, json: String) -> Result<(), SignalError> {
        self.sender
            .send(json)
            .map_err(|_| SignalError::SessionGone(session_id.to_string()))
    }
}

/// Outbound channels of the open WebSocket sessions
#[derive(Default)]
pub struct SessionTable {
    /// Map from session ID to the socket's writer channel
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, session_id: Uuid, sender: mpsc::UnboundedSender<String>) {
        self.sessions
            .write()
            .await
            .insert(session_id, Session { sender, held: None });
        tracing::debug!("Session {} connected", session_id);
    }

    pub async fn remove(&self, session_id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&session_id).is_some();
        if removed {
            tracing::debug!("Session {} disconnected", session_id);
        }
        removed
    }

    pub async fn contains(&self, session_id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Queue `event` on the session's socket, or hold it while an answer is pending.
    /// Never retried.
    pub async fn send(&self, session_id: Uuid, event: &ServerEvent) -> Result<(), SignalError> {
        let json = serde_json::to_string(event)?;

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| SignalError::SessionGone(session_id.to_string()))?;

        match session.held.as_mut() {
            Some(held) => {
                held.push(json);
                Ok(())
            }
            None => session.deliver(session_id, json),
        }
    }

    /// Hold outbound events until [`release`](Self::release) or [`reject`](Self::reject)
    pub async fn hold(&self, session_id: Uuid) {
        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.held.get_or_insert_with(Vec::new);
        }
    }

    /// Send `answer`, then everything held behind it
    pub async fn release(&self, session_id: Uuid, answer: &ServerEvent) -> Result<(), SignalError> {
        let json = serde_json::to_string(answer)?;

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| SignalError::SessionGone(session_id.to_string()))?;

        let held = session.held.take().unwrap_or_default();
        session.deliver(session_id, json)?;
        for json in held {
            session.deliver(session_id, json)?;
        }
        Ok(())
    }

    /// Send `error` and drop everything held for the failed negotiation
    pub async fn reject(&self, session_id: Uuid, error: &ServerEvent) -> Result<(), SignalError> {
        let json = serde_json::to_string(error)?;

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| SignalError::SessionGone(session_id.to_string()))?;

        if let Some(held) = session.held.take() {
            tracing::debug!("Dropping {} held events for {}", held.len(), session_id);
        }
        session.deliver(session_id, json)
    }
}
