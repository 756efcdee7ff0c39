use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResolverConfig {
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,
    /// yt-dlp format selector.
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Netscape cookie file contents, handed to yt-dlp through a temp file.
    #[serde(default)]
    pub cookies: Option<String>,
    /// Serve plain http(s) audio links directly.
    #[serde(default = "default_true")]
    pub http: bool,
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: default_ytdlp_path(),
            format: default_format(),
            timeout_secs: default_timeout_secs(),
            cookies: None,
            http: true,
        }
    }
}

fn default_ytdlp_path() -> String {
    "yt-dlp".to_string()
}

fn default_format() -> String {
    "bestaudio/best".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}
