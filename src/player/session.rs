use std::collections::VecDeque;

use serde::Serialize;
use tokio::{sync::Mutex, time::Instant};

use crate::{
    common::types::{GuildId, SessionKey, StreamId},
    player::Track,
    voice::VoiceConnection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Nothing is streaming.
    Idle,
    /// Exactly one stream is active on the connection.
    Playing,
    /// Teardown has begun; terminal for this session object.
    Stopping,
}

#[derive(Debug, Clone)]
pub struct ActiveStream {
    pub id: StreamId,
    pub track: Track,
    pub started_at: Instant,
}

/// Mutable session state, guarded by the session lock.
pub(crate) struct SessionInner {
    pub(crate) queue: VecDeque<Track>,
    pub(crate) state: SessionState,
    pub(crate) last_active_at: Instant,
    pub(crate) connection: Option<Box<dyn VoiceConnection>>,
    pub(crate) active: Option<ActiveStream>,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            state: SessionState::Idle,
            last_active_at: Instant::now(),
            connection: None,
            active: None,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_active_at = Instant::now();
    }

    pub(crate) fn is_idle_since(&self, now: Instant, timeout: std::time::Duration) -> bool {
        self.state != SessionState::Playing
            && now.saturating_duration_since(self.last_active_at) > timeout
    }
}

/// Playback context for one guild.
///
/// Two locks, always taken in this order: `join_gate` serializes connect and
/// teardown, `inner` guards every queue and state read-modify-write.
pub struct Session {
    key: SessionKey,
    created_at: Instant,
    pub(crate) join_gate: Mutex<()>,
    pub(crate) inner: Mutex<SessionInner>,
}

/// Point-in-time copy of a session, taken under its lock.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub guild: GuildId,
    pub state: SessionState,
    pub now_playing: Option<Track>,
    pub queue: Vec<Track>,
    pub connected: bool,
    pub last_active_at: Instant,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            created_at: Instant::now(),
            join_gate: Mutex::new(()),
            inner: Mutex::new(SessionInner::new()),
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn last_active_at(&self) -> Instant {
        self.inner.lock().await.last_active_at
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            guild: self.key,
            state: inner.state,
            now_playing: inner.active.as_ref().map(|a| a.track.clone()),
            queue: inner.queue.iter().cloned().collect(),
            connected: inner.connection.is_some(),
            last_active_at: inner.last_active_at,
        }
    }

    #[cfg(test)]
    pub(crate) async fn set_last_active_at(&self, at: Instant) {
        self.inner.lock().await.last_active_at = at;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("key", &self.key).finish_non_exhaustive()
    }
}
