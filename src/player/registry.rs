use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::{common::types::SessionKey, player::Session};

/// Guild id → session. Every operation is atomic with respect to the others.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `key`, creating it if absent. Concurrent
    /// callers for one key always receive the same session.
    pub fn get_or_create(&self, key: SessionKey) -> Arc<Session> {
        self.sessions
            .entry(key)
            .or_insert_with(|| {
                debug!("[{}] creating session", key);
                Arc::new(Session::new(key))
            })
            .clone()
    }

    pub fn get(&self, key: SessionKey) -> Option<Arc<Session>> {
        self.sessions.get(&key).map(|s| s.clone())
    }

    pub fn remove(&self, key: SessionKey) -> Option<Arc<Session>> {
        self.sessions.remove(&key).map(|(_, s)| s)
    }

    /// Removes `session` only if it is still the registered session for its
    /// key, so a replacement created after teardown started stays put.
    pub fn remove_if_same(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(&session.key(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Snapshot of all sessions. Shard locks are released before returning.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
