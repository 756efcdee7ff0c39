use async_trait::async_trait;

use super::{
    http::HttpSource,
    plugin::{BoxedResolver, TrackResolver},
    youtube::YtDlpSource,
};
use crate::{common::errors::ResolutionError, configs::ResolverConfig, player::Track};

/// Source Manager
///
/// Routes each query to the first registered source that claims it.
pub struct SourceManager {
    pub sources: Vec<BoxedResolver>,
}

impl SourceManager {
    /// Create a new SourceManager with all configured sources
    pub fn new(config: &ResolverConfig) -> Self {
        let mut sources: Vec<BoxedResolver> = Vec::new();

        macro_rules! register_source {
            ($enabled:expr, $name:literal, $ctor:expr) => {
                if $enabled {
                    match $ctor {
                        Ok(src) => {
                            tracing::info!("Loaded source: {}", $name);
                            sources.push(Box::new(src));
                        }
                        Err(e) => {
                            tracing::error!("{} source failed to initialize: {}", $name, e);
                        }
                    }
                }
            };
        }

        register_source!(true, "YouTube (yt-dlp)", YtDlpSource::new(config));
        register_source!(config.http, "http", HttpSource::new(config));

        Self { sources }
    }

    pub fn from_sources(sources: Vec<BoxedResolver>) -> Self {
        Self { sources }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl TrackResolver for SourceManager {
    fn name(&self) -> &str {
        "manager"
    }

    fn can_handle(&self, query: &str) -> bool {
        self.sources.iter().any(|s| s.can_handle(query))
    }

    /// Resolve using the first matching source
    async fn resolve(&self, query: &str) -> Result<Track, ResolutionError> {
        for source in &self.sources {
            if source.can_handle(query) {
                tracing::trace!("Resolving '{}' with source: {}", query, source.name());
                return source.resolve(query).await;
            }
        }

        tracing::debug!("No source could handle query: {}", query);
        Err(ResolutionError::NoResults(query.to_string()))
    }
}
