//! Discord voice through songbird. Decoding and the voice transport live in
//! songbird; this adapter only maps its call and track handles onto
//! [`VoiceConnector`] and [`VoiceConnection`].

use std::{num::NonZeroU64, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use songbird::{
    Call, Event, EventContext, Songbird, TrackEvent,
    error::JoinError,
    input::{HttpRequest, Input, YoutubeDl},
    tracks::TrackHandle,
};
use tracing::{debug, warn};

use super::{CompletionNotifier, VoiceConnection, VoiceConnector};
use crate::{
    common::{
        errors::{ConnectionError, PlaybackStartError},
        types::{ChannelId, GuildId},
    },
    player::Track,
};

pub struct SongbirdConnector {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    ytdlp_path: &'static str,
}

impl SongbirdConnector {
    /// `ytdlp_path` is leaked once; songbird keeps the program name as a
    /// `&'static str`.
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client, ytdlp_path: String) -> Self {
        Self {
            manager,
            http,
            ytdlp_path: Box::leak(ytdlp_path.into_boxed_str()),
        }
    }
}

fn songbird_guild(guild: GuildId) -> Result<songbird::id::GuildId, ConnectionError> {
    NonZeroU64::new(guild.0)
        .map(songbird::id::GuildId::from)
        .ok_or_else(|| ConnectionError::Join(format!("invalid guild id {}", guild)))
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> Result<Box<dyn VoiceConnection>, ConnectionError> {
        let guild_id = songbird_guild(guild)?;
        let channel_id = NonZeroU64::new(channel.0)
            .map(songbird::id::ChannelId::from)
            .ok_or_else(|| ConnectionError::Join(format!("invalid channel id {}", channel)))?;

        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| ConnectionError::Join(e.to_string()))?;

        Ok(Box::new(SongbirdConnection {
            guild,
            manager: self.manager.clone(),
            call,
            http: self.http.clone(),
            ytdlp_path: self.ytdlp_path,
            current: Mutex::new(None),
        }))
    }
}

struct SongbirdConnection {
    guild: GuildId,
    manager: Arc<Songbird>,
    call: Arc<tokio::sync::Mutex<Call>>,
    http: reqwest::Client,
    ytdlp_path: &'static str,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdConnection {
    /// Direct links are fetched as-is. Extracted tracks go back through
    /// yt-dlp here, so the media URL and its headers are fresh at start.
    fn input_for(&self, track: &Track) -> Input {
        match &track.stream_url {
            Some(url) => HttpRequest::new(self.http.clone(), url.clone()).into(),
            None => {
                YoutubeDl::new_ytdl_like(self.ytdlp_path, self.http.clone(), track.uri.clone())
                    .into()
            }
        }
    }
}

/// Fires the play call's notifier on the first end or error event.
struct TrackEndNotifier {
    slot: Arc<Mutex<Option<CompletionNotifier>>>,
}

#[async_trait]
impl songbird::EventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        if let Some(notifier) = self.slot.lock().take() {
            notifier.notify();
        }
        Some(Event::Cancel)
    }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn play(
        &self,
        track: &Track,
        on_complete: CompletionNotifier,
    ) -> Result<(), PlaybackStartError> {
        let input = self.input_for(track);
        let handle = self.call.lock().await.play_only_input(input);

        let slot = Arc::new(Mutex::new(Some(on_complete)));
        for event in [TrackEvent::End, TrackEvent::Error] {
            let handler = TrackEndNotifier { slot: slot.clone() };
            if let Err(e) = handle.add_event(Event::Track(event), handler) {
                let _ = handle.stop();
                return Err(PlaybackStartError::Output(e.to_string()));
            }
        }

        debug!("[{}] songbird track {} started", self.guild, handle.uuid());
        *self.current.lock() = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        if let Some(handle) = self.current.lock().take() {
            if let Err(e) = handle.stop() {
                debug!("[{}] track already finished: {}", self.guild, e);
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.stop();
        let guild_id = songbird_guild(self.guild)?;
        match self.manager.remove(guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => Ok(()),
            Err(e) => {
                warn!("[{}] songbird remove failed: {}", self.guild, e);
                Err(ConnectionError::Disconnect(e.to_string()))
            }
        }
    }
}
