use std::sync::Arc;

use dashmap::DashMap;
use queuelink::{
    bot::{
        CommandHandler,
        discord::{self, DiscordHandler},
    },
    common::{
        banner::{BuildInfo, print_banner},
        http::HttpClient,
        logger,
        types::AnyResult,
    },
    configs::Config,
    player::{InactivityMonitor, PlaybackCoordinator, SessionRegistry},
    sources::SourceManager,
    transport::{self, AppState},
    voice::songbird::SongbirdConnector,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    logger::init(&config.logging);
    print_banner(&BuildInfo::default());
    config.validate()?;

    let registry = Arc::new(SessionRegistry::new());
    let resolver = Arc::new(SourceManager::new(&config.resolver));
    info!("Sources: {}", resolver.source_names().join(", "));

    let voice = songbird::Songbird::serenity();
    let connector = SongbirdConnector::new(
        voice.clone(),
        HttpClient::new(config.resolver.timeout())?,
        config.resolver.ytdlp_path.clone(),
    );
    let coordinator = PlaybackCoordinator::new(
        registry.clone(),
        Arc::new(connector),
        config.player.event_buffer,
    );

    let shutdown = CancellationToken::new();

    let monitor = InactivityMonitor::new(
        coordinator.clone(),
        config.player.inactivity_timeout(),
        config.player.sweep_interval(),
    );
    tokio::spawn(monitor.run(shutdown.clone()));

    if config.server.enabled {
        let state = Arc::new(AppState::new(registry.clone()));
        let server_config = config.server.clone();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = transport::serve(&server_config, state, server_shutdown).await {
                error!("HTTP server failed: {}", e);
            }
        });
    }

    let commands = Arc::new(CommandHandler::new(
        coordinator.clone(),
        resolver,
        config.bot.prefix.clone(),
    ));
    let reply_channels = Arc::new(DashMap::new());
    let mut client = discord::build_client(
        &config.bot.token,
        DiscordHandler::new(commands, reply_channels.clone()),
        voice,
    )
    .await?;

    tokio::spawn(discord::forward_events(
        coordinator.events(),
        client.http.clone(),
        reply_channels,
        shutdown.clone(),
    ));

    let shard_manager = client.shard_manager.clone();
    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                error!("Discord client error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    shutdown.cancel();
    coordinator.stop_all().await;
    shard_manager.shutdown_all().await;
    info!("Bye");
    Ok(())
}
