use async_trait::async_trait;

use crate::{common::errors::ResolutionError, player::Track};

/// Trait that all track resolvers must implement.
///
/// Each source (yt-dlp, direct HTTP) implements this trait to turn a user
/// query into a playable [`Track`].
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Unique identifier for this source (e.g., "http", "youtube")
    fn name(&self) -> &str;

    /// Check if this source can handle the given query.
    ///
    /// Examples:
    /// - HTTP source: any http:// or https:// URL
    /// - YouTube source: youtube.com / youtu.be links and free-text search
    fn can_handle(&self, query: &str) -> bool;

    /// Resolve the query into a single track. May suspend on network or
    /// subprocess I/O; callers must not hold session locks.
    async fn resolve(&self, query: &str) -> Result<Track, ResolutionError>;
}

pub type BoxedResolver = Box<dyn TrackResolver>;
