//! Session hub — tracks the live sessions of a peer.
//!
//! The [`SessionHub`] is a thread-safe map from session ID to [`Session`]
//! handle. Sessions are added when their handshake completes and removed when
//! their connection loop ends.

use crate::session::Session;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Thread-safe registry of live sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionHub {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionHub {
    /// Create a new empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session.
    pub fn insert(&self, session: Session) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session.id().to_string(), session);
    }

    /// Stop tracking a session.
    pub fn remove(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(id)
    }

    /// Look up a session by ID.
    pub fn get(&self, id: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(id).cloned()
    }

    /// Snapshot of every live session.
    pub fn all(&self) -> Vec<Session> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionInfo;
    use std::time::Duration;

    fn session(id: &str) -> Session {
        let info = SessionInfo {
            id: id.to_string(),
            peer_name: "test".to_string(),
            local_addr: "127.0.0.1:1".parse().unwrap(),
            remote_addr: "127.0.0.1:2".parse().unwrap(),
        };
        Session::new(info, 0, Duration::from_secs(1)).0
    }

    #[test]
    fn test_insert_get_remove() {
        let hub = SessionHub::new();
        hub.insert(session("s1"));
        hub.insert(session("s2"));
        assert_eq!(hub.count(), 2);
        assert_eq!(hub.get("s1").unwrap().id(), "s1");
        assert!(hub.get("nope").is_none());

        assert!(hub.remove("s1").is_some());
        assert!(hub.remove("s1").is_none());
        assert_eq!(hub.count(), 1);
        assert_eq!(hub.all()[0].id(), "s2");
    }

    #[test]
    fn test_clones_share_state() {
        let hub = SessionHub::new();
        let other = hub.clone();
        hub.insert(session("s1"));
        assert_eq!(other.count(), 1);
    }
}
