use std::{io::Write, process::Stdio, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::{
    common::{errors::ResolutionError, types::AnyResult},
    configs::ResolverConfig,
    player::Track,
    sources::plugin::TrackResolver,
};

/// Resolves YouTube links and free-text searches through the `yt-dlp`
/// executable.
///
/// Search queries take the first hit (`ytsearch1:`). Tracks carry the
/// video page, not the extracted media URL: googlevideo links expire and
/// need yt-dlp's request headers, so the audio output extracts again when
/// the track actually starts. Cookies, when configured, are written once to
/// a temp file that lives as long as the source.
pub struct YtDlpSource {
    program: String,
    format: String,
    timeout: Duration,
    cookies: Option<NamedTempFile>,
    youtube_regex: Regex,
    url_regex: Regex,
}

/// The subset of `yt-dlp -j` output we read.
#[derive(Debug, Deserialize)]
struct VideoInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    #[serde(default)]
    is_live: Option<bool>,
}

impl YtDlpSource {
    pub fn new(config: &ResolverConfig) -> AnyResult<Self> {
        let cookies = match config.cookies.as_deref() {
            Some(contents) if !contents.trim().is_empty() => {
                let mut file = tempfile::Builder::new()
                    .prefix("queuelink-cookies-")
                    .suffix(".txt")
                    .tempfile()?;
                file.write_all(contents.as_bytes())?;
                file.flush()?;
                debug!("yt-dlp cookies written to {}", file.path().display());
                Some(file)
            }
            _ => None,
        };

        Ok(Self {
            program: config.ytdlp_path.clone(),
            format: config.format.clone(),
            timeout: config.timeout(),
            cookies,
            youtube_regex: Regex::new(
                r"^https?://(?:www\.)?youtube\.com/watch\?v=|^https?://youtu\.be/",
            )?,
            url_regex: Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://")?,
        })
    }

    fn is_youtube_url(&self, query: &str) -> bool {
        self.youtube_regex.is_match(query)
    }

    /// What yt-dlp is asked to extract: the link itself, or a one-result
    /// search.
    fn target(&self, query: &str) -> String {
        if self.is_youtube_url(query) {
            query.to_string()
        } else {
            format!("ytsearch1:{}", query)
        }
    }

    fn args(&self, target: &str) -> Vec<String> {
        let mut args = vec![
            "-j".to_string(),
            "-f".to_string(),
            self.format.clone(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--quiet".to_string(),
        ];
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.path().display().to_string());
        }
        // Keeps queries starting with '-' from being read as options.
        args.push("--".to_string());
        args.push(target.to_string());
        args
    }

    /// Builds a track from yt-dlp's JSON output. Search results with no hit
    /// produce no output at all.
    fn parse_output(query: &str, stdout: &str) -> Result<Track, ResolutionError> {
        let Some(line) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Err(ResolutionError::NoResults(query.to_string()));
        };

        let info: VideoInfo = serde_json::from_str(line)
            .map_err(|e| ResolutionError::Backend(format!("unreadable yt-dlp output: {}", e)))?;

        let uri = info
            .webpage_url
            .filter(|u| !u.is_empty())
            .or_else(|| {
                info.id
                    .filter(|id| !id.is_empty())
                    .map(|id| format!("https://www.youtube.com/watch?v={}", id))
            })
            .ok_or_else(|| ResolutionError::Backend("yt-dlp returned no video url".into()))?;

        let mut track = Track::new(uri, query, "youtube");
        if let Some(title) = info.title {
            track = track.with_title(title);
        }
        if info.is_live != Some(true) {
            if let Some(secs) = info.duration.filter(|d| d.is_finite() && *d >= 0.0) {
                track = track.with_duration(Duration::from_secs_f64(secs));
            }
        }
        Ok(track)
    }
}

#[async_trait]
impl TrackResolver for YtDlpSource {
    fn name(&self) -> &str {
        "youtube"
    }

    fn can_handle(&self, query: &str) -> bool {
        self.is_youtube_url(query) || !self.url_regex.is_match(query)
    }

    async fn resolve(&self, query: &str) -> Result<Track, ResolutionError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolutionError::NoResults(String::new()));
        }

        let target = self.target(query);
        debug!("Resolving '{}' with yt-dlp", target);

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(self.args(&target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("yt-dlp timed out for '{}'", query);
                return Err(ResolutionError::Timeout(self.timeout.as_secs()));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or("no error output");
            warn!("yt-dlp failed for '{}': {}", query, reason);
            return Err(ResolutionError::Backend(format!(
                "yt-dlp exited with {}: {}",
                output.status, reason
            )));
        }

        Self::parse_output(query, &String::from_utf8_lossy(&output.stdout))
    }
}
