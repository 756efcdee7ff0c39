//! Voice capability consumed by the playback core.
//!
//! A [`VoiceConnector`] joins a voice channel and yields a
//! [`VoiceConnection`], which is the audio output for that guild. The
//! coordinator owns each connection exclusively and releases it exactly
//! once.

use async_trait::async_trait;

use crate::{
    common::{
        errors::{ConnectionError, PlaybackStartError},
        types::{ChannelId, GuildId},
    },
    player::Track,
};

pub mod completion;
#[cfg(feature = "discord")]
pub mod songbird;

pub use completion::{Completion, CompletionNotifier};

#[async_trait]
pub trait VoiceConnector: Send + Sync {
    /// Joins `channel` in `guild`. May suspend on network I/O.
    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> Result<Box<dyn VoiceConnection>, ConnectionError>;
}

/// A live voice connection and its audio output.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Whether the voice link is still up. False once the bot has been
    /// dropped from the channel.
    async fn is_connected(&self) -> bool;

    /// Starts streaming `track`. The output must hand `on_complete` back
    /// (notify or drop it) once the stream ends for any reason, including
    /// [`VoiceConnection::stop`].
    async fn play(
        &self,
        track: &Track,
        on_complete: CompletionNotifier,
    ) -> Result<(), PlaybackStartError>;

    /// Stops the active stream, if any.
    fn stop(&self);

    async fn disconnect(&self) -> Result<(), ConnectionError>;
}
