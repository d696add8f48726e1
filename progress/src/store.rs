use crate::message::ProgressEvent;
use dashmap::DashMap;
use log::*;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Opaque identifier for one batch invocation (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Process-wide map from session to its append-only event log
pub struct SessionStore {
    /// Primary storage: events per session, in append order
    sessions: DashMap<SessionId, Vec<ProgressEvent>>,

    /// Eviction deadlines for finished sessions
    expirations: DashMap<SessionId, Instant>,

    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            expirations: DashMap::new(),
            ttl,
        }
    }

    /// Open a new, empty session
    pub fn create_session(&self) -> SessionId {
        let session_id = SessionId::new();
        self.sessions.insert(session_id.clone(), Vec::new());
        debug!("Opened progress session {}", session_id.as_str());
        session_id
    }

    /// Append an event; returns false when the session does not exist (already evicted)
    pub fn append(&self, session_id: &SessionId, event: ProgressEvent) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut events) => {
                events.push(event);
                true
            }
            None => {
                warn!(
                    "Dropping progress event for unknown session {}",
                    session_id.as_str()
                );
                false
            }
        }
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// All events of a session, or None once it is gone
    pub fn events(&self, session_id: &SessionId) -> Option<Vec<ProgressEvent>> {
        self.events_since(session_id, 0)
    }

    /// Events appended after the first `offset` ones
    pub fn events_since(&self, session_id: &SessionId, offset: usize) -> Option<Vec<ProgressEvent>> {
        self.sessions
            .get(session_id)
            .map(|events| events.iter().skip(offset).cloned().collect())
    }

    /// Mark a session finished; the sweeper evicts it once the TTL has elapsed
    pub fn finish(&self, session_id: &SessionId) {
        if self.contains(session_id) {
            self.expirations
                .insert(session_id.clone(), Instant::now() + self.ttl);
        }
    }

    /// Remove every finished session whose TTL has elapsed; returns how many went away
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<SessionId> = self
            .expirations
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| entry.key().clone())
            .collect();

        for session_id in &expired {
            self.expirations.remove(session_id);
            self.sessions.remove(session_id);
            debug!("Evicted progress session {}", session_id.as_str());
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Spawn the single background task that evicts expired sessions.
    ///
    /// The task holds only a weak reference and exits once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<SessionStore> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        let evicted = store.sweep();
                        if evicted > 0 {
                            info!("Evicted {evicted} expired progress session(s)");
                        }
                    }
                    None => break,
                }
            }
        })
    }
}
