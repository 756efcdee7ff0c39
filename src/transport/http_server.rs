use std::{sync::Arc, time::Instant};

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    common::{banner::BuildInfo, types::AnyResult},
    configs::ServerConfig,
    player::{SessionRegistry, SessionState},
};

/// Shared state for the liveness routes.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub started_at: Instant,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            started_at: Instant::now(),
            build: BuildInfo::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub sessions: usize,
    pub playing: usize,
    pub queued: usize,
    pub uptime_secs: u64,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/version", get(version))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /
async fn root() -> &'static str {
    "Bot is running!"
}

/// GET /version
async fn version(State(state): State<Arc<AppState>>) -> Json<BuildInfo> {
    Json(state.build.clone())
}

/// GET /stats
async fn stats(State(state): State<Arc<AppState>>) -> Json<Stats> {
    let mut stats = Stats {
        uptime_secs: state.started_at.elapsed().as_secs(),
        ..Stats::default()
    };
    for session in state.registry.sessions() {
        let snapshot = session.snapshot().await;
        if snapshot.state == SessionState::Stopping {
            continue;
        }
        stats.sessions += 1;
        if snapshot.state == SessionState::Playing {
            stats.playing += 1;
        }
        stats.queued += snapshot.queue.len();
    }
    Json(stats)
}

/// Binds `config.address()` and serves until `shutdown` fires.
pub async fn serve(
    config: &ServerConfig,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> AnyResult<()> {
    let listener = TcpListener::bind(config.address()).await?;
    serve_on(listener, state, shutdown).await
}

pub async fn serve_on(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> AnyResult<()> {
    info!("HTTP server running on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP server stopped");
    Ok(())
}
