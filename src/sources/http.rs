use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{
    Client, Url,
    header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap, RANGE},
};
use tracing::debug;

use crate::{
    common::{errors::ResolutionError, http::HttpClient, types::AnyResult},
    configs::ResolverConfig,
    player::Track,
    sources::plugin::TrackResolver,
};

/// HTTP/HTTPS source
///
/// Handles direct audio stream URLs. The link is probed once so that pages
/// and dead links are rejected before they reach the queue.
pub struct HttpSource {
    url_regex: Regex,
    client: Client,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(config: &ResolverConfig) -> AnyResult<Self> {
        let timeout = config.timeout();
        Self::with_client(HttpClient::new(timeout)?, timeout)
    }

    pub fn with_client(client: Client, timeout: Duration) -> AnyResult<Self> {
        Ok(Self {
            url_regex: Regex::new(r"^https?://")?,
            client,
            timeout,
        })
    }

    fn is_valid_content_type(content_type: &str) -> bool {
        content_type.starts_with("audio/")
            || content_type.starts_with("video/")
            || content_type.starts_with("application/ogg")
            || content_type == "application/octet-stream"
            || content_type.is_empty()
    }

    /// Display title from stream headers, falling back to the file name.
    fn title_from(url: &Url, headers: &HeaderMap) -> String {
        headers
            .get("icy-name")
            .and_then(|h| h.to_str().ok())
            .or_else(|| {
                headers
                    .get(CONTENT_DISPOSITION)
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.split("filename=\"").nth(1))
                    .and_then(|s| s.split('"').next())
            })
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                url.path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .filter(|s| !s.is_empty())
                    .unwrap_or("Audio Stream")
                    .to_string()
            })
    }

    async fn probe(&self, url: &Url) -> Result<HeaderMap, ResolutionError> {
        // HEAD first; some hosts reject it, so fall back to a one-byte GET.
        let head = self
            .client
            .head(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .ok()
            .filter(|r| r.status().is_success());
        if let Some(response) = head {
            return Ok(response.headers().clone());
        }

        let response = self
            .client
            .get(url.clone())
            .header(RANGE, "bytes=0-0")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ResolutionError::Timeout(self.timeout.as_secs())
                } else {
                    ResolutionError::Backend(format!("HTTP request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(ResolutionError::Backend(format!(
                "HTTP request failed with status: {}",
                response.status()
            )));
        }
        Ok(response.headers().clone())
    }
}

#[async_trait]
impl TrackResolver for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    fn can_handle(&self, query: &str) -> bool {
        self.url_regex.is_match(query.trim())
    }

    async fn resolve(&self, query: &str) -> Result<Track, ResolutionError> {
        let raw = query.trim().trim_start_matches('<').trim_end_matches('>');
        let url = Url::parse(raw)
            .map_err(|e| ResolutionError::MalformedUrl(format!("{}: {}", raw, e)))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ResolutionError::MalformedUrl(raw.to_string()));
        }

        debug!("Probing HTTP source: {}", url);
        let headers = self.probe(&url).await?;

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !Self::is_valid_content_type(content_type) {
            return Err(ResolutionError::Backend(format!(
                "unsupported content type: {}",
                content_type
            )));
        }

        let title = Self::title_from(&url, &headers);
        Ok(Track::new(url.as_str(), query.trim(), "http")
            .with_stream_url(url.as_str())
            .with_title(title))
    }
}
