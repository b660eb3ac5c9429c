use chrono::{DateTime, Utc};
use geodispatch_core::RowIndex;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Identifier of one worker session
pub type SessionId = Uuid;

/// Information about a running worker session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub peer: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub current_item: Option<RowIndex>,
    pub completed: usize,
}

impl SessionInfo {
    pub fn new(session_id: SessionId, peer: String) -> Self {
        let now = Utc::now();
        SessionInfo {
            session_id,
            peer,
            connected_at: now,
            last_activity: now,
            current_item: None,
            completed: 0,
        }
    }
}

/// Registry of all running worker sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: SessionId, peer: String) -> SessionInfo {
        let info = SessionInfo::new(session_id, peer);
        self.sessions.write().insert(session_id, info.clone());
        info
    }

    pub fn deregister(&self, session_id: &SessionId) -> Option<SessionInfo> {
        self.sessions.write().remove(session_id)
    }

    /// Note the item a session is working on (`None` between items)
    pub fn set_current(&self, session_id: &SessionId, index: Option<RowIndex>) {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.current_item = index;
            session.last_activity = Utc::now();
        }
    }

    pub fn record_completion(&self, session_id: &SessionId) {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.completed += 1;
            session.current_item = None;
            session.last_activity = Utc::now();
        }
    }

    pub fn get(&self, session_id: &SessionId) -> Option<SessionInfo> {
        self.sessions.read().get(session_id).cloned()
    }

    /// All sessions, oldest first
    pub fn all_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.connected_at);
        sessions
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }
}
