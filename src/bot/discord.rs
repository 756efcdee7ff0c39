//! Serenity gateway front-end: turns guild messages into commands and
//! posts playback events back to the channel the guild last used.

use std::sync::Arc;

use dashmap::DashMap;
use serenity::{
    Client,
    all::{ChannelId as DiscordChannelId, Context, EventHandler, GatewayIntents, Message, Ready},
    async_trait,
    http::Http,
};
use songbird::Songbird;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    bot::handler::{CommandContext, CommandHandler},
    common::types::{ChannelId, GuildId},
    player::{CloseReason, PlaybackEvent},
};

/// Text channel each guild last sent a command from.
pub type ReplyChannels = Arc<DashMap<GuildId, DiscordChannelId>>;

pub struct DiscordHandler {
    commands: Arc<CommandHandler>,
    reply_channels: ReplyChannels,
}

impl DiscordHandler {
    pub fn new(commands: Arc<CommandHandler>, reply_channels: ReplyChannels) -> Self {
        Self {
            commands,
            reply_channels,
        }
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Logged in as {}", ready.user.name);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let author_voice = ctx.cache.guild(guild_id).and_then(|guild| {
            guild
                .voice_states
                .get(&msg.author.id)
                .and_then(|state| state.channel_id)
        });
        let command_ctx = CommandContext {
            guild: GuildId(guild_id.get()),
            author_voice: author_voice.map(|c| ChannelId(c.get())),
        };

        let Some(reply) = self.commands.handle_message(&command_ctx, &msg.content).await else {
            return;
        };
        self.reply_channels.insert(command_ctx.guild, msg.channel_id);

        if let Err(e) = msg.channel_id.say(&ctx.http, reply).await {
            warn!("[{}] failed to send reply: {}", command_ctx.guild, e);
        }
    }
}

pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_VOICE_STATES
}

pub async fn build_client(
    token: &str,
    handler: DiscordHandler,
    voice: Arc<Songbird>,
) -> serenity::Result<Client> {
    Client::builder(token, intents())
        .event_handler(handler)
        .voice_manager_arc(voice)
        .await
}

/// The chat message, if any, an event deserves. Failures inside a `play`
/// command's own enqueue are already answered by the command reply.
fn notice_for(event: &PlaybackEvent) -> Option<String> {
    match event {
        PlaybackEvent::TrackFailed {
            track,
            from_enqueue: false,
            ..
        } => Some(format!("Could not play: {}", track.label)),
        PlaybackEvent::SessionClosed {
            reason: CloseReason::Inactivity,
            ..
        } => Some("Left the voice channel due to inactivity.".to_string()),
        _ => None,
    }
}

/// Relays coordinator events to Discord until `cancel` fires.
pub async fn forward_events(
    events: flume::Receiver<PlaybackEvent>,
    http: Arc<Http>,
    reply_channels: ReplyChannels,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv_async() => match event {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        let guild = event.guild();
        let channel = match &event {
            PlaybackEvent::SessionClosed { .. } => reply_channels.remove(&guild).map(|(_, c)| c),
            _ => reply_channels.get(&guild).map(|c| *c),
        };

        let (Some(channel), Some(notice)) = (channel, notice_for(&event)) else {
            continue;
        };
        debug!("[{}] notifying channel {}: {}", guild, channel, notice);
        if let Err(e) = channel.say(&http, notice).await {
            warn!("[{}] failed to send notice: {}", guild, e);
        }
    }
    debug!("Event forwarder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Track;

    #[test]
    fn only_failures_and_inactivity_are_announced() {
        let guild = GuildId(1);
        let track = Track::new("u", "lofi", "youtube");

        assert_eq!(
            notice_for(&PlaybackEvent::TrackFailed {
                guild,
                track: track.clone(),
                error: "gone".into(),
                from_enqueue: false,
            }),
            Some("Could not play: lofi".to_string())
        );
        assert!(
            notice_for(&PlaybackEvent::TrackFailed {
                guild,
                track: track.clone(),
                error: "gone".into(),
                from_enqueue: true,
            })
            .is_none()
        );
        assert!(
            notice_for(&PlaybackEvent::SessionClosed {
                guild,
                reason: CloseReason::Inactivity
            })
            .is_some()
        );
        assert!(
            notice_for(&PlaybackEvent::SessionClosed {
                guild,
                reason: CloseReason::Requested
            })
            .is_none()
        );
        assert!(notice_for(&PlaybackEvent::TrackStarted { guild, track }).is_none());
    }
}
