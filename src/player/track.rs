use std::time::Duration;

use serde::Serialize;

/// A resolved, playable piece of audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Canonical location: the video page for extracted tracks, the media
    /// URL itself for direct links.
    pub uri: String,
    /// Direct media URL for direct links. Unset for extracted tracks, which
    /// the audio output resolves from `uri` when they start.
    pub stream_url: Option<String>,
    /// The query the user typed.
    pub label: String,
    pub title: Option<String>,
    pub duration: Option<Duration>,
    pub source_name: &'static str,
}

impl Track {
    pub fn new(uri: impl Into<String>, label: impl Into<String>, source_name: &'static str) -> Self {
        Self {
            uri: uri.into(),
            stream_url: None,
            label: label.into(),
            title: None,
            duration: None,
            source_name,
        }
    }

    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.label)
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.duration {
            Some(d) => {
                let secs = d.as_secs();
                write!(f, "{} ({}:{:02})", self.display_name(), secs / 60, secs % 60)
            }
            None => write!(f, "{}", self.display_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_title_and_duration() {
        let track = Track::new("u", "never gonna", "youtube")
            .with_title("Never Gonna Give You Up")
            .with_duration(Duration::from_secs(213));
        assert_eq!(track.to_string(), "Never Gonna Give You Up (3:33)");
        assert_eq!(Track::new("u", "query", "http").to_string(), "query");
    }
}
