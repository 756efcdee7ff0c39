use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    bot::commands::Command,
    common::{
        errors::{ConnectionError, CoreError, ResolutionError},
        types::{ChannelId, GuildId},
    },
    player::{CloseReason, Enqueued, PlaybackCoordinator, Track},
    sources::TrackResolver,
};

/// Where a command came from.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext {
    pub guild: GuildId,
    /// The author's current voice channel, if any.
    pub author_voice: Option<ChannelId>,
}

/// Maps each chat command onto one coordinator operation and produces the
/// reply text.
pub struct CommandHandler {
    coordinator: Arc<PlaybackCoordinator>,
    resolver: Arc<dyn TrackResolver>,
    prefix: String,
}

impl CommandHandler {
    pub fn new(
        coordinator: Arc<PlaybackCoordinator>,
        resolver: Arc<dyn TrackResolver>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            resolver,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parses and runs `content`. Returns `None` for messages that are not
    /// commands.
    pub async fn handle_message(&self, ctx: &CommandContext, content: &str) -> Option<String> {
        let command = Command::parse(&self.prefix, content)?;
        debug!("[{}] command {:?}", ctx.guild, command);
        Some(self.handle(ctx, command).await)
    }

    pub async fn handle(&self, ctx: &CommandContext, command: Command) -> String {
        match command {
            Command::Play(query) => self.play(ctx, &query).await,
            Command::Skip => self.skip(ctx).await,
            Command::Leave => self.leave(ctx).await,
            Command::Help => self.help(),
        }
    }

    async fn play(&self, ctx: &CommandContext, query: &str) -> String {
        if query.is_empty() {
            return format!("Usage: `{}play <song name or URL>`", self.prefix);
        }

        // A leave or inactivity sweep can close the session between join and
        // enqueue; one retry rejoins with a fresh session.
        let mut resolved: Option<Track> = None;
        for _ in 0..2 {
            let joined = self
                .coordinator
                .ensure_voice(ctx.guild, ctx.author_voice)
                .await;
            let session = match joined {
                Ok(session) => session,
                Err(CoreError::Connection(ConnectionError::NotInVoice)) => {
                    return "You must be in a voice channel for me to join.".to_string();
                }
                Err(e) => {
                    warn!("[{}] could not join voice: {}", ctx.guild, e);
                    return "Could not join your voice channel.".to_string();
                }
            };

            let track = match resolved.take() {
                Some(track) => track,
                None => match self.resolver.resolve(query).await {
                    Ok(track) => track,
                    Err(e) => {
                        if matches!(e, ResolutionError::NoResults(_)) {
                            debug!("[{}] no results for '{}'", ctx.guild, query);
                        } else {
                            warn!("[{}] failed to resolve '{}': {}", ctx.guild, query, e);
                        }
                        return format!("Could not find anything for: {}", query);
                    }
                },
            };

            match self.coordinator.enqueue(&session, track.clone()).await {
                Ok(Enqueued::Playing) => return format!("Now playing: {}", query),
                Ok(Enqueued::Queued { .. }) => return format!("Added to queue: {}", query),
                Ok(Enqueued::Failed) => return format!("Could not play: {}", query),
                Err(CoreError::SessionClosed(_)) => {
                    debug!("[{}] session closed during play, rejoining", ctx.guild);
                    resolved = Some(track);
                }
                Err(e) => {
                    warn!("[{}] enqueue failed: {}", ctx.guild, e);
                    return format!("Could not play: {}", query);
                }
            }
        }

        format!("Could not play: {}", query)
    }

    async fn skip(&self, ctx: &CommandContext) -> String {
        let skipped = match self.coordinator.registry().get(ctx.guild) {
            Some(session) => self.coordinator.skip(&session).await,
            None => Ok(None),
        };

        match skipped {
            Ok(Some(_)) => "Skipped current song.".to_string(),
            Ok(None) => "Nothing is playing to skip.".to_string(),
            Err(e) => {
                warn!("[{}] skip failed: {}", ctx.guild, e);
                "Could not skip the current song.".to_string()
            }
        }
    }

    async fn leave(&self, ctx: &CommandContext) -> String {
        let Some(session) = self.coordinator.registry().get(ctx.guild) else {
            return "I'm not in a voice channel!".to_string();
        };
        let connected = session.snapshot().await.connected;

        let closed = match self.coordinator.stop(&session, CloseReason::Requested).await {
            Ok(closed) => closed,
            Err(e) => {
                // Torn down regardless; only the disconnect itself failed.
                warn!("[{}] leave: {}", ctx.guild, e);
                true
            }
        };

        if closed && connected {
            "Disconnected and cleared the queue.".to_string()
        } else {
            "I'm not in a voice channel!".to_string()
        }
    }

    fn help(&self) -> String {
        format!(
            "**Music Bot Commands:**\n\n\
             - `{p}play <song name or URL>`\n\
             - `{p}skip`\n\
             - `{p}leave`",
            p = self.prefix
        )
    }
}
