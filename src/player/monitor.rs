use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::player::PlaybackCoordinator;

/// Periodically disconnects sessions that have been idle too long.
pub struct InactivityMonitor {
    coordinator: Arc<PlaybackCoordinator>,
    timeout: Duration,
    period: Duration,
}

impl InactivityMonitor {
    pub fn new(coordinator: Arc<PlaybackCoordinator>, timeout: Duration, period: Duration) -> Self {
        Self {
            coordinator,
            timeout,
            period,
        }
    }

    /// One pass over every session as of `now`. Returns how many were closed.
    ///
    /// The idle check and the teardown happen under the session lock, so a
    /// `play` that lands mid-sweep either keeps the session alive or finds it
    /// already closed.
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let mut closed = 0;
        for session in self.coordinator.registry().sessions() {
            match self
                .coordinator
                .stop_if_idle(&session, self.timeout, now)
                .await
            {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => warn!("[{}] inactivity disconnect failed: {}", session.key(), e),
            }
        }
        closed
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        info!(
            "Inactivity monitor started (timeout {}s, every {}s)",
            self.timeout.as_secs(),
            self.period.as_secs()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let closed = self.sweep_at(Instant::now()).await;
                    if closed > 0 {
                        debug!("Inactivity sweep closed {} session(s)", closed);
                    }
                }
            }
        }
        debug!("Inactivity monitor stopped");
    }
}
