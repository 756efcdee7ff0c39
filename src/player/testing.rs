//! In-memory voice layer used by the coordinator tests.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    common::{
        errors::{ConnectionError, PlaybackStartError},
        types::{ChannelId, GuildId},
    },
    player::{Session, SessionState, Track},
    voice::{CompletionNotifier, VoiceConnection, VoiceConnector},
};

/// Shared observation point for every connection a [`MockConnector`] hands
/// out.
#[derive(Default)]
pub(crate) struct MockOutput {
    pub plays: Mutex<Vec<String>>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_connect: AtomicBool,
    /// When set, `stop` keeps the notifier alive instead of firing it.
    pub silent_stop: AtomicBool,
    links: Mutex<Vec<Arc<AtomicBool>>>,
    pending: Mutex<Vec<CompletionNotifier>>,
    swallowed: Mutex<Vec<CompletionNotifier>>,
    failing: Mutex<HashSet<String>>,
}

impl MockOutput {
    pub fn fail_track(&self, label: &str) {
        self.failing.lock().insert(label.to_string());
    }

    pub fn played(&self) -> Vec<String> {
        self.plays.lock().clone()
    }

    pub fn play_count(&self) -> usize {
        self.plays.lock().len()
    }

    /// Drops the most recent voice link, as if the bot was kicked from the
    /// channel. The connection object stays in place but reports itself dead.
    pub fn sever_link(&self) {
        if let Some(live) = self.links.lock().last() {
            live.store(false, Ordering::SeqCst);
        }
    }

    /// Ends the active stream as if it reached its natural end.
    pub fn finish_current(&self) -> bool {
        let Some(notifier) = self.pending.lock().pop() else {
            return false;
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        notifier.notify();
        true
    }
}

pub(crate) struct MockConnector {
    pub output: Arc<MockOutput>,
    pub connect_delay: Duration,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            output: Arc::new(MockOutput::default()),
            connect_delay: Duration::ZERO,
        }
    }

    pub fn with_delay(connect_delay: Duration) -> Self {
        Self {
            connect_delay,
            ..Self::new()
        }
    }
}

#[async_trait]
impl VoiceConnector for MockConnector {
    async fn connect(
        &self,
        _guild: GuildId,
        _channel: ChannelId,
    ) -> Result<Box<dyn VoiceConnection>, ConnectionError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        self.output.connects.fetch_add(1, Ordering::SeqCst);
        if self.output.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::Join("gateway refused".into()));
        }
        let live = Arc::new(AtomicBool::new(true));
        self.output.links.lock().push(live.clone());
        Ok(Box::new(MockConnection {
            live,
            output: self.output.clone(),
        }))
    }
}

struct MockConnection {
    live: Arc<AtomicBool>,
    output: Arc<MockOutput>,
}

#[async_trait]
impl VoiceConnection for MockConnection {
    async fn is_connected(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    async fn play(
        &self,
        track: &Track,
        on_complete: CompletionNotifier,
    ) -> Result<(), PlaybackStartError> {
        if self.output.failing.lock().contains(&track.label) {
            return Err(PlaybackStartError::Input(format!("cannot open {}", track.uri)));
        }
        self.output.plays.lock().push(track.label.clone());
        let now_active = self.output.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.output.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.output.pending.lock().push(on_complete);
        Ok(())
    }

    fn stop(&self) {
        self.output.stops.fetch_add(1, Ordering::SeqCst);
        let Some(notifier) = self.output.pending.lock().pop() else {
            return;
        };
        self.output.active.fetch_sub(1, Ordering::SeqCst);
        if self.output.silent_stop.load(Ordering::SeqCst) {
            self.output.swallowed.lock().push(notifier);
        } else {
            notifier.notify();
        }
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.output.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn track(label: &str) -> Track {
    Track::new(format!("https://example.com/{}.mp3", label), label, "http")
}

/// Polls `cond` until it holds, failing the test after five seconds.
pub(crate) async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

pub(crate) async fn wait_for_state(session: &Session, state: SessionState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.state().await != state {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("session did not reach expected state within 5s");
}
