use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    common::{
        errors::{ConnectionError, CoreError, CoreResult},
        types::{ChannelId, GuildId, StreamId},
    },
    player::{
        ActiveStream, CloseReason, PlaybackEvent, Session, SessionRegistry, SessionState, Track,
        session::SessionInner,
    },
    voice::{Completion, CompletionNotifier, VoiceConnection, VoiceConnector},
};

/// Result of [`PlaybackCoordinator::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The session was idle and this call started playback.
    Playing,
    /// Waiting behind the current stream; `position` is 1-based.
    Queued { position: usize },
    /// The session was idle but no queued track could be started.
    Failed,
}

/// Owns every session state transition.
///
/// Each operation runs its check-then-act sequence while holding the target
/// session's lock. Completions from the audio output arrive as messages and
/// are applied one at a time by a pump task, never re-entrantly from the
/// output's own context.
pub struct PlaybackCoordinator {
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn VoiceConnector>,
    completions: flume::Sender<Completion>,
    events_tx: flume::Sender<PlaybackEvent>,
    events_rx: flume::Receiver<PlaybackEvent>,
    next_stream: AtomicU64,
}

impl PlaybackCoordinator {
    /// Builds the coordinator and spawns its completion pump on the current
    /// tokio runtime.
    pub fn new(
        registry: Arc<SessionRegistry>,
        connector: Arc<dyn VoiceConnector>,
        event_buffer: usize,
    ) -> Arc<Self> {
        let (completions, completion_rx) = flume::unbounded();
        let (events_tx, events_rx) = flume::bounded(event_buffer.max(1));

        let coordinator = Arc::new(Self {
            registry,
            connector,
            completions,
            events_tx,
            events_rx,
            next_stream: AtomicU64::new(1),
        });

        tokio::spawn(completion_loop(Arc::downgrade(&coordinator), completion_rx));
        coordinator
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Playback events for the chat front-end. Events are dropped when the
    /// channel is full.
    pub fn events(&self) -> flume::Receiver<PlaybackEvent> {
        self.events_rx.clone()
    }

    /// Returns the guild's session with a live voice connection, joining
    /// `channel` first if needed.
    ///
    /// Serialized per guild: concurrent callers for one guild connect once.
    pub async fn ensure_voice(
        &self,
        guild: GuildId,
        channel: Option<ChannelId>,
    ) -> CoreResult<Arc<Session>> {
        let channel = channel.ok_or(ConnectionError::NotInVoice)?;

        loop {
            let session = self.registry.get_or_create(guild);
            let _gate = session.join_gate.lock().await;

            let dead = {
                let mut inner = session.inner.lock().await;
                if inner.state == SessionState::Stopping {
                    // Torn down while we waited on the gate; start over with
                    // a fresh session.
                    drop(inner);
                    self.registry.remove_if_same(&session);
                    continue;
                }
                let alive = match inner.connection.as_deref() {
                    Some(connection) => Some(connection.is_connected().await),
                    None => None,
                };
                match alive {
                    Some(true) => return Ok(session.clone()),
                    Some(false) => Self::release_dead_link(guild, &mut inner),
                    None => None,
                }
            };
            if let Some(dead) = dead {
                if let Err(e) = dead.disconnect().await {
                    debug!("[{}] releasing lost voice connection: {}", guild, e);
                }
            }

            info!("[{}] joining voice channel {}", guild, channel);
            let connection = match self.connector.connect(guild, channel).await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("[{}] voice join failed: {}", guild, e);
                    return Err(e.into());
                }
            };

            let mut inner = session.inner.lock().await;
            inner.connection = Some(connection);
            inner.touch();
            if inner.state == SessionState::Idle && !inner.queue.is_empty() {
                debug!("[{}] resuming {} queued after rejoin", guild, inner.queue.len());
                if let Err(e) = self.advance(guild, &mut inner, false).await {
                    error!("[{}] advance after rejoin failed: {}", guild, e);
                }
            }
            return Ok(session.clone());
        }
    }

    /// Detaches a connection whose voice link went away. The interrupted
    /// stream is dropped and the queue is kept for the next connection.
    fn release_dead_link(
        guild: GuildId,
        inner: &mut SessionInner,
    ) -> Option<Box<dyn VoiceConnection>> {
        warn!("[{}] voice connection lost, rejoining", guild);
        if let Some(active) = inner.active.take() {
            debug!("[{}] dropping interrupted stream {} ({})", guild, active.id, active.track);
            if let Some(connection) = inner.connection.as_deref() {
                connection.stop();
            }
        }
        inner.state = SessionState::Idle;
        inner.connection.take()
    }

    /// Appends `track` and starts playback if the session is idle.
    pub async fn enqueue(&self, session: &Arc<Session>, track: Track) -> CoreResult<Enqueued> {
        let guild = session.key();
        let mut inner = session.inner.lock().await;

        if inner.state == SessionState::Stopping {
            return Err(CoreError::SessionClosed(guild));
        }
        if inner.connection.is_none() {
            return Err(ConnectionError::NotConnected(guild).into());
        }

        debug!("[{}] enqueue {}", guild, track);
        inner.queue.push_back(track);
        inner.touch();

        if inner.state == SessionState::Playing {
            return Ok(Enqueued::Queued {
                position: inner.queue.len(),
            });
        }

        self.advance(guild, &mut inner, true).await?;
        Ok(match inner.state {
            SessionState::Playing => Enqueued::Playing,
            _ => Enqueued::Failed,
        })
    }

    /// Stops the active stream and moves to the next queued track.
    ///
    /// Returns the skipped track, or `None` when nothing was playing. The
    /// stopped stream's own completion arrives later with a stale id and is
    /// discarded, so a skip causes exactly one advance.
    pub async fn skip(&self, session: &Arc<Session>) -> CoreResult<Option<Track>> {
        let guild = session.key();
        let mut inner = session.inner.lock().await;

        if inner.state != SessionState::Playing {
            return Ok(None);
        }
        let Some(skipped) = inner.active.take() else {
            return Err(self.violation(guild, "playing without an active stream"));
        };

        if let Some(connection) = inner.connection.as_deref() {
            connection.stop();
        }
        info!("[{}] skipped {}", guild, skipped.track);

        self.advance(guild, &mut inner, false).await?;
        Ok(Some(skipped.track))
    }

    /// Tears the session down: clears the queue, stops the stream, releases
    /// the connection and removes the session from the registry.
    ///
    /// Returns `false` when another call already tore it down.
    pub async fn stop(&self, session: &Arc<Session>, reason: CloseReason) -> CoreResult<bool> {
        self.teardown(session, reason, |_| true).await
    }

    /// [`stop`](Self::stop), but only if the session is not playing and has
    /// been inactive for longer than `timeout` at `now`. The check runs under
    /// the same lock as the transition.
    pub async fn stop_if_idle(
        &self,
        session: &Arc<Session>,
        timeout: Duration,
        now: Instant,
    ) -> CoreResult<bool> {
        self.teardown(session, CloseReason::Inactivity, |inner| {
            inner.is_idle_since(now, timeout)
        })
        .await
    }

    /// Stops every session. Used on shutdown.
    pub async fn stop_all(&self) {
        for session in self.registry.sessions() {
            if let Err(e) = self.stop(&session, CloseReason::Requested).await {
                warn!("[{}] error while closing session: {}", session.key(), e);
            }
        }
    }

    async fn teardown(
        &self,
        session: &Arc<Session>,
        reason: CloseReason,
        should_close: impl FnOnce(&SessionInner) -> bool + Send,
    ) -> CoreResult<bool> {
        let guild = session.key();
        let _gate = session.join_gate.lock().await;

        let connection = {
            let mut inner = session.inner.lock().await;
            if inner.state == SessionState::Stopping || !should_close(&inner) {
                return Ok(false);
            }

            inner.state = SessionState::Stopping;
            let dropped = inner.queue.len();
            inner.queue.clear();
            if let Some(active) = inner.active.take() {
                debug!("[{}] stopping stream {} ({})", guild, active.id, active.track);
                if let Some(connection) = inner.connection.as_deref() {
                    connection.stop();
                }
            }
            debug!("[{}] closing session, dropped {} queued", guild, dropped);
            inner.connection.take()
        };

        let Some(connection) = connection else {
            // Never joined, or the join failed: there is no channel to leave.
            self.registry.remove_if_same(session);
            debug!("[{}] discarded session without a voice connection", guild);
            return Ok(true);
        };

        let result = connection.disconnect().await;
        self.registry.remove_if_same(session);

        match reason {
            CloseReason::Inactivity => info!("[{}] left voice channel due to inactivity", guild),
            CloseReason::Requested => info!("[{}] left voice channel", guild),
        }
        self.emit(PlaybackEvent::SessionClosed { guild, reason });

        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("[{}] voice disconnect failed: {}", guild, e);
                Err(e.into())
            }
        }
    }

    /// Pops queued tracks until one starts, or goes idle when the queue runs
    /// out. Caller holds the session lock. `from_enqueue` marks start
    /// failures the enqueue caller already learns about through
    /// [`Enqueued::Failed`].
    async fn advance(
        &self,
        guild: GuildId,
        inner: &mut SessionInner,
        from_enqueue: bool,
    ) -> CoreResult<()> {
        if let Some(active) = &inner.active {
            let detail = format!("advance requested while stream {} is active", active.id);
            return Err(self.violation(guild, &detail));
        }
        if inner.state == SessionState::Stopping {
            return Ok(());
        }

        loop {
            let Some(track) = inner.queue.pop_front() else {
                inner.state = SessionState::Idle;
                inner.touch();
                debug!("[{}] queue finished", guild);
                self.emit(PlaybackEvent::QueueFinished { guild });
                return Ok(());
            };

            let Some(connection) = inner.connection.as_deref() else {
                inner.queue.clear();
                inner.state = SessionState::Idle;
                return Err(self.violation(guild, "advance without a voice connection"));
            };

            let id = StreamId(self.next_stream.fetch_add(1, Ordering::Relaxed));
            let notifier = CompletionNotifier::new(guild, id, self.completions.clone());
            let started = connection.play(&track, notifier).await;

            match started {
                Ok(()) => {
                    info!("[{}] now playing {} (stream {})", guild, track, id);
                    inner.active = Some(ActiveStream {
                        id,
                        track: track.clone(),
                        started_at: Instant::now(),
                    });
                    inner.state = SessionState::Playing;
                    inner.touch();
                    self.emit(PlaybackEvent::TrackStarted { guild, track });
                    return Ok(());
                }
                Err(e) => {
                    warn!("[{}] could not start {}: {}", guild, track, e);
                    self.emit(PlaybackEvent::TrackFailed {
                        guild,
                        track,
                        error: e.to_string(),
                        from_enqueue,
                    });
                }
            }
        }
    }

    async fn on_complete(&self, completion: Completion) {
        let Completion { guild, stream } = completion;
        let Some(session) = self.registry.get(guild) else {
            debug!("[{}] completion for stream {} after session closed", guild, stream);
            return;
        };

        let mut inner = session.inner.lock().await;
        match &inner.active {
            Some(active) if active.id == stream => {}
            _ => {
                debug!("[{}] ignoring stale completion for stream {}", guild, stream);
                return;
            }
        }

        if let Some(finished) = inner.active.take() {
            debug!("[{}] finished {} (stream {})", guild, finished.track, stream);
        }
        if let Err(e) = self.advance(guild, &mut inner, false).await {
            error!("[{}] advance after completion failed: {}", guild, e);
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Err(flume::TrySendError::Full(event)) = self.events_tx.try_send(event) {
            debug!("[{}] event buffer full, dropping {:?}", event.guild(), event);
        }
    }

    fn violation(&self, guild: GuildId, detail: &str) -> CoreError {
        error!("[{}] invariant violation: {}", guild, detail);
        CoreError::InvariantViolation {
            guild,
            detail: detail.to_string(),
        }
    }
}

async fn completion_loop(coordinator: Weak<PlaybackCoordinator>, rx: flume::Receiver<Completion>) {
    while let Ok(completion) = rx.recv_async().await {
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        coordinator.on_complete(completion).await;
    }
    debug!("completion pump stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::player::testing::{MockConnector, MockOutput, track, wait_for, wait_for_state};

    const GUILD: GuildId = GuildId(100);
    const VOICE: Option<ChannelId> = Some(ChannelId(200));

    fn setup() -> (Arc<PlaybackCoordinator>, Arc<MockOutput>) {
        setup_with(MockConnector::new())
    }

    fn setup_with(connector: MockConnector) -> (Arc<PlaybackCoordinator>, Arc<MockOutput>) {
        let output = connector.output.clone();
        let coordinator =
            PlaybackCoordinator::new(Arc::new(SessionRegistry::new()), Arc::new(connector), 64);
        (coordinator, output)
    }

    #[tokio::test]
    async fn ensure_voice_requires_a_channel() {
        let (coordinator, output) = setup();
        let err = coordinator.ensure_voice(GUILD, None).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Connection(ConnectionError::NotInVoice)
        ));
        assert_eq!(output.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_join_leaves_idle_session_without_connection() {
        let (coordinator, output) = setup();
        output.fail_connect.store(true, Ordering::SeqCst);

        let err = coordinator.ensure_voice(GUILD, VOICE).await.unwrap_err();
        assert!(matches!(err, CoreError::Connection(ConnectionError::Join(_))));

        let session = coordinator.registry().get(GUILD).unwrap();
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, SessionState::Idle);
        assert!(!snapshot.connected);

        let err = coordinator.enqueue(&session, track("a")).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Connection(ConnectionError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn lost_voice_link_is_rejoined_and_queue_resumes() {
        let (coordinator, output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        for label in ["a", "b", "c"] {
            coordinator.enqueue(&session, track(label)).await.unwrap();
        }

        output.sever_link();
        let rejoined = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();

        assert!(Arc::ptr_eq(&session, &rejoined));
        assert_eq!(output.connects.load(Ordering::SeqCst), 2);
        assert_eq!(output.disconnects.load(Ordering::SeqCst), 1);
        // "a" died with the old link; the queue carries on from "b".
        assert_eq!(output.played(), vec!["a", "b"]);
        assert_eq!(
            coordinator.enqueue(&rejoined, track("d")).await.unwrap(),
            Enqueued::Queued { position: 2 }
        );

        // The interrupted stream's completion is stale.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(output.played(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn live_connection_is_not_rejoined() {
        let (coordinator, output) = setup();
        coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        assert_eq!(output.connects.load(Ordering::SeqCst), 1);
        assert_eq!(output.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sweeping_a_never_joined_session_announces_nothing() {
        let (coordinator, output) = setup();
        let events = coordinator.events();
        output.fail_connect.store(true, Ordering::SeqCst);
        coordinator.ensure_voice(GUILD, VOICE).await.unwrap_err();

        let session = coordinator.registry().get(GUILD).unwrap();
        let later = session.last_active_at().await + Duration::from_secs(3600);
        assert!(
            coordinator
                .stop_if_idle(&session, Duration::from_secs(1800), later)
                .await
                .unwrap()
        );

        assert!(coordinator.registry().get(GUILD).is_none());
        assert_eq!(output.disconnects.load(Ordering::SeqCst), 0);
        assert!(
            !events
                .drain()
                .any(|e| matches!(e, PlaybackEvent::SessionClosed { .. }))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_first_joins_connect_once() {
        let (coordinator, output) =
            setup_with(MockConnector::with_delay(Duration::from_millis(20)));

        let joins: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.ensure_voice(GUILD, VOICE).await })
            })
            .collect();
        let sessions: Vec<Arc<Session>> = futures::future::join_all(joins)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(output.connects.load(Ordering::SeqCst), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_first_plays_create_one_connection() {
        let (coordinator, output) =
            setup_with(MockConnector::with_delay(Duration::from_millis(20)));

        let plays: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|label| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    let session = coordinator.ensure_voice(GUILD, VOICE).await?;
                    coordinator.enqueue(&session, track(label)).await
                })
            })
            .collect();
        for outcome in futures::future::join_all(plays).await {
            outcome.unwrap().unwrap();
        }

        assert_eq!(output.connects.load(Ordering::SeqCst), 1);
        assert_eq!(output.play_count(), 1);
        let session = coordinator.registry().get(GUILD).unwrap();
        assert_eq!(session.snapshot().await.queue.len(), 1);
    }

    #[tokio::test]
    async fn enqueue_on_idle_session_starts_playback() {
        let (coordinator, output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();

        assert_eq!(
            coordinator.enqueue(&session, track("a")).await.unwrap(),
            Enqueued::Playing
        );
        assert_eq!(
            coordinator.enqueue(&session, track("b")).await.unwrap(),
            Enqueued::Queued { position: 1 }
        );
        assert_eq!(
            coordinator.enqueue(&session, track("c")).await.unwrap(),
            Enqueued::Queued { position: 2 }
        );

        assert_eq!(output.played(), vec!["a"]);
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, SessionState::Playing);
        assert_eq!(snapshot.now_playing.map(|t| t.label), Some("a".to_string()));
    }

    #[tokio::test]
    async fn tracks_play_in_fifo_order_and_session_goes_idle() {
        let (coordinator, output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        for label in ["a", "b", "c"] {
            coordinator.enqueue(&session, track(label)).await.unwrap();
        }

        for played in 1..=3 {
            wait_for(|| output.play_count() == played).await;
            assert!(output.finish_current());
        }

        wait_for_state(&session, SessionState::Idle).await;
        assert_eq!(output.played(), vec!["a", "b", "c"]);
        assert_eq!(output.max_active.load(Ordering::SeqCst), 1);

        let before = session.last_active_at().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(output.play_count(), 3);
        assert_eq!(session.last_active_at().await, before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueues_never_double_play() {
        let (coordinator, output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();

        let enqueues: Vec<_> = (0..16)
            .map(|i| {
                let coordinator = coordinator.clone();
                let session = session.clone();
                tokio::spawn(async move {
                    coordinator
                        .enqueue(&session, track(&format!("t{}", i)))
                        .await
                })
            })
            .collect();
        let outcomes: Vec<Enqueued> = futures::future::join_all(enqueues)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(
            outcomes.iter().filter(|o| **o == Enqueued::Playing).count(),
            1
        );

        // Drain, racing finishes against skips.
        for i in 0..16 {
            wait_for(|| output.play_count() == i + 1).await;
            if i % 3 == 0 {
                coordinator.skip(&session).await.unwrap();
            } else {
                output.finish_current();
            }
        }
        wait_for_state(&session, SessionState::Idle).await;

        let mut played = output.played();
        assert_eq!(played.len(), 16);
        played.sort();
        played.dedup();
        assert_eq!(played.len(), 16);
        assert_eq!(output.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn interleaved_producers_keep_their_own_order() {
        let (coordinator, output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();

        let producers: Vec<_> = ["x", "y"]
            .into_iter()
            .map(|prefix| {
                let coordinator = coordinator.clone();
                let session = session.clone();
                tokio::spawn(async move {
                    for i in 0..5 {
                        coordinator
                            .enqueue(&session, track(&format!("{}{}", prefix, i)))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for producer in futures::future::join_all(producers).await {
            producer.unwrap();
        }

        for played in 1..=10 {
            wait_for(|| output.play_count() == played).await;
            output.finish_current();
        }
        wait_for_state(&session, SessionState::Idle).await;

        let played = output.played();
        for prefix in ["x", "y"] {
            let order: Vec<&String> = played.iter().filter(|l| l.starts_with(prefix)).collect();
            let expected: Vec<String> = (0..5).map(|i| format!("{}{}", prefix, i)).collect();
            assert_eq!(order, expected.iter().collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn skip_and_stop_completion_advance_once() {
        let (coordinator, output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        for label in ["a", "b", "c"] {
            coordinator.enqueue(&session, track(label)).await.unwrap();
        }

        // The mock fires the stopped stream's completion; it must be ignored.
        let skipped = coordinator.skip(&session).await.unwrap();
        assert_eq!(skipped.map(|t| t.label), Some("a".to_string()));
        assert_eq!(output.played(), vec!["a", "b"]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(output.played(), vec!["a", "b"]);
        assert_eq!(session.snapshot().await.queue.len(), 1);
    }

    #[tokio::test]
    async fn natural_end_queued_before_skip_advances_once() {
        let (coordinator, output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        for label in ["a", "b", "c"] {
            coordinator.enqueue(&session, track(label)).await.unwrap();
        }

        // "a" ends on its own while the session is locked, so its completion
        // is already waiting on the pump when skip runs.
        {
            let _inner = session.inner.lock().await;
            assert!(output.finish_current());
        }
        let skipped = coordinator.skip(&session).await.unwrap();
        assert_eq!(skipped.map(|t| t.label), Some("a".to_string()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(output.played(), vec!["a", "b"]);
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.now_playing.map(|t| t.label), Some("b".to_string()));
        assert_eq!(snapshot.queue.len(), 1);
        assert_eq!(output.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn skip_advances_even_if_output_never_reports_stop() {
        let (coordinator, output) = setup();
        output.silent_stop.store(true, Ordering::SeqCst);
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        coordinator.enqueue(&session, track("a")).await.unwrap();
        coordinator.enqueue(&session, track("b")).await.unwrap();

        coordinator.skip(&session).await.unwrap();
        assert_eq!(output.played(), vec!["a", "b"]);
        assert_eq!(session.state().await, SessionState::Playing);
    }

    #[tokio::test]
    async fn duplicate_completion_is_ignored() {
        let (coordinator, output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        for label in ["a", "b", "c"] {
            coordinator.enqueue(&session, track(label)).await.unwrap();
        }

        let first = {
            let inner = session.inner.lock().await;
            inner.active.as_ref().map(|a| a.id).unwrap()
        };
        output.finish_current();
        wait_for(|| output.play_count() == 2).await;

        // A misbehaving output reporting the same stream again.
        CompletionNotifier::new(GUILD, first, coordinator.completions.clone()).notify();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(output.played(), vec!["a", "b"]);
        assert_eq!(session.snapshot().await.queue.len(), 1);
    }

    #[tokio::test]
    async fn skip_when_idle_reports_nothing_playing() {
        let (coordinator, output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        assert!(coordinator.skip(&session).await.unwrap().is_none());
        assert_eq!(output.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_failure_moves_to_next_track() {
        let (coordinator, output) = setup();
        output.fail_track("broken");
        let events = coordinator.events();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();

        assert_eq!(
            coordinator.enqueue(&session, track("broken")).await.unwrap(),
            Enqueued::Failed
        );
        assert_eq!(session.state().await, SessionState::Idle);

        coordinator.enqueue(&session, track("good")).await.unwrap();
        coordinator.enqueue(&session, track("broken")).await.unwrap();
        coordinator.enqueue(&session, track("after")).await.unwrap();
        output.finish_current();

        wait_for(|| output.play_count() == 2).await;
        assert_eq!(output.played(), vec!["good", "after"]);
        assert_eq!(session.state().await, SessionState::Playing);

        let failures: Vec<bool> = events
            .drain()
            .filter_map(|e| match e {
                PlaybackEvent::TrackFailed { from_enqueue, .. } => Some(from_enqueue),
                _ => None,
            })
            .collect();
        // The first failure is answered by `Enqueued::Failed`; the second
        // happens later, on the completion path.
        assert_eq!(failures, vec![true, false]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stops_release_connection_once() {
        let (coordinator, output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        coordinator.enqueue(&session, track("a")).await.unwrap();
        coordinator.enqueue(&session, track("b")).await.unwrap();

        let stops: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                let session = session.clone();
                tokio::spawn(async move { coordinator.stop(&session, CloseReason::Requested).await })
            })
            .collect();
        let closed: Vec<bool> = futures::future::join_all(stops)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(closed.iter().filter(|c| **c).count(), 1);
        assert_eq!(output.disconnects.load(Ordering::SeqCst), 1);
        assert!(coordinator.registry().get(GUILD).is_none());
        assert_eq!(session.state().await, SessionState::Stopping);
        assert!(session.snapshot().await.queue.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(output.played(), vec!["a"]);
    }

    #[tokio::test]
    async fn stopped_session_rejects_work_and_rejoin_builds_fresh_one() {
        let (coordinator, output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        assert!(coordinator.stop(&session, CloseReason::Requested).await.unwrap());

        let err = coordinator.enqueue(&session, track("late")).await.unwrap_err();
        assert!(matches!(err, CoreError::SessionClosed(_)));

        let fresh = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        assert!(!Arc::ptr_eq(&session, &fresh));
        assert_eq!(output.connects.load(Ordering::SeqCst), 2);
        assert_eq!(
            coordinator.enqueue(&fresh, track("a")).await.unwrap(),
            Enqueued::Playing
        );
    }

    #[tokio::test]
    async fn old_stream_completion_does_not_touch_replacement_session() {
        let (coordinator, output) = setup();
        output.silent_stop.store(true, Ordering::SeqCst);
        let old = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        coordinator.enqueue(&old, track("old")).await.unwrap();
        let old_stream = old.inner.lock().await.active.as_ref().map(|a| a.id).unwrap();
        coordinator.stop(&old, CloseReason::Requested).await.unwrap();

        let fresh = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        coordinator.enqueue(&fresh, track("new")).await.unwrap();
        coordinator.enqueue(&fresh, track("next")).await.unwrap();

        CompletionNotifier::new(GUILD, old_stream, coordinator.completions.clone()).notify();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(output.played(), vec!["old", "new"]);
    }

    #[tokio::test]
    async fn stop_if_idle_respects_timeout_boundary() {
        let (coordinator, _output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        let t0 = Instant::now();
        session.set_last_active_at(t0).await;
        let timeout = Duration::from_secs(1800);
        let epsilon = Duration::from_millis(1);

        assert!(
            !coordinator
                .stop_if_idle(&session, timeout, t0 + timeout - epsilon)
                .await
                .unwrap()
        );
        assert!(coordinator.registry().get(GUILD).is_some());

        assert!(
            coordinator
                .stop_if_idle(&session, timeout, t0 + timeout + epsilon)
                .await
                .unwrap()
        );
        assert!(coordinator.registry().get(GUILD).is_none());
    }

    #[tokio::test]
    async fn playing_session_is_never_idle() {
        let (coordinator, output) = setup();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        coordinator.enqueue(&session, track("long")).await.unwrap();
        let t0 = session.last_active_at().await;

        let closed = coordinator
            .stop_if_idle(&session, Duration::from_secs(1), t0 + Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(!closed);
        assert_eq!(output.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn events_follow_lifecycle() {
        let (coordinator, output) = setup();
        let events = coordinator.events();
        let session = coordinator.ensure_voice(GUILD, VOICE).await.unwrap();
        coordinator.enqueue(&session, track("a")).await.unwrap();
        output.finish_current();
        wait_for_state(&session, SessionState::Idle).await;
        coordinator.stop(&session, CloseReason::Requested).await.unwrap();

        let kinds: Vec<&'static str> = events
            .drain()
            .map(|e| match e {
                PlaybackEvent::TrackStarted { .. } => "started",
                PlaybackEvent::TrackFailed { .. } => "failed",
                PlaybackEvent::QueueFinished { .. } => "finished",
                PlaybackEvent::SessionClosed { .. } => "closed",
            })
            .collect();
        assert_eq!(kinds, vec!["started", "finished", "closed"]);
    }
}
