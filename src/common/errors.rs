use crate::common::types::GuildId;

/// A query could not be turned into a playable track.
///
/// Recovered locally: the caller is told, the queue is left untouched.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    #[error("no results for {0:?}")]
    NoResults(String),

    #[error("malformed url: {0}")]
    MalformedUrl(String),

    #[error("resolver timed out after {0}s")]
    Timeout(u64),

    /// The resolver ran but reported a failure (non-zero exit, bad output).
    #[error("resolver failed: {0}")]
    Backend(String),

    #[error("resolver io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ResolutionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Joining or leaving a voice channel failed.
///
/// The session is left idle with no connection handle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("caller is not in a voice channel")]
    NotInVoice,

    #[error("session for guild {0} holds no voice connection")]
    NotConnected(GuildId),

    #[error("failed to join voice channel: {0}")]
    Join(String),

    #[error("failed to leave voice channel: {0}")]
    Disconnect(String),
}

/// The audio output could not begin streaming a popped track.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlaybackStartError {
    #[error("audio output rejected track: {0}")]
    Output(String),

    #[error("could not open audio input: {0}")]
    Input(String),
}

/// Errors returned by the playback coordinator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The session is being torn down and accepts no further work.
    #[error("session for guild {0} is closed")]
    SessionClosed(GuildId),

    /// A state transition that a correct coordinator never performs.
    #[error("invariant violated in guild {guild}: {detail}")]
    InvariantViolation { guild: GuildId, detail: String },
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
