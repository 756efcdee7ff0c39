use crate::{common::types::GuildId, player::Track};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `leave` command or shutdown.
    Requested,
    Inactivity,
}

/// Notifications emitted by the coordinator for the chat front-end.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    TrackStarted { guild: GuildId, track: Track },
    /// `from_enqueue` is set when the track failed inside the `enqueue` call
    /// that added it, whose caller already got [`Enqueued::Failed`].
    ///
    /// [`Enqueued::Failed`]: crate::player::Enqueued::Failed
    TrackFailed {
        guild: GuildId,
        track: Track,
        error: String,
        from_enqueue: bool,
    },
    QueueFinished { guild: GuildId },
    SessionClosed { guild: GuildId, reason: CloseReason },
}

impl PlaybackEvent {
    pub fn guild(&self) -> GuildId {
        match self {
            Self::TrackStarted { guild, .. }
            | Self::TrackFailed { guild, .. }
            | Self::QueueFinished { guild }
            | Self::SessionClosed { guild, .. } => *guild,
        }
    }
}
