use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serenity::model::id::UserId;
use std::{sync::LazyLock, time::Duration};
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use super::{StreamResolver, TrackResolver};
use crate::audio::track::{AudioResource, Track};
use crate::error::{PlaybackError, Result};

static PLAYLIST_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]list=[\w-]+|/playlist/|/sets/").expect("valid playlist regex"));

/// Metadata printed by `yt-dlp -j` / `-J`.
#[derive(Debug, Deserialize)]
struct VideoEntry {
    title: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistDump {
    #[serde(default)]
    entries: Vec<VideoEntry>,
}

impl VideoEntry {
    fn into_track(self, requested_by: UserId) -> Option<Track> {
        let source_url = self.webpage_url.or(self.url)?;
        let title = self.title.unwrap_or_else(|| source_url.clone());
        let thumbnail = self
            .thumbnail
            .or_else(|| self.thumbnails.into_iter().last().map(|t| t.url));
        let duration = self.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0);

        let mut track = Track::new(title, requested_by)
            .with_source_url(source_url)
            .with_duration(duration.round() as u64);
        if let Some(thumbnail) = thumbnail {
            track = track.with_thumbnail(thumbnail);
        }
        Some(track)
    }
}

/// Resolves tracks and streams by shelling out to yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpClient {
    binary: String,
    timeout: Duration,
}

impl YtDlpClient {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn is_url(query: &str) -> bool {
        Url::parse(query)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false)
    }

    pub fn is_playlist_url(url: &str) -> bool {
        Self::is_url(url) && PLAYLIST_PATTERN.is_match(url)
    }

    /// Runs yt-dlp and returns stdout.
    async fn run(&self, target: &str, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).args(["--no-warnings", "--quiet"]).arg(target);
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                PlaybackError::resolution(
                    target,
                    format!("yt-dlp timed out after {}", humantime::format_duration(self.timeout)),
                )
            })?
            .map_err(|e| PlaybackError::resolution(target, format!("yt-dlp process error: {}", e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp failed for {}: {}", target, error.trim());
            return Err(PlaybackError::resolution(target, error.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// What to hand yt-dlp for a track's stream: its page, or a one-result
    /// search on the title when the track arrived without one.
    fn stream_target(track: &Track) -> String {
        match track.source_url.as_deref() {
            Some(url) => url.to_string(),
            None => format!("ytsearch1:{}", track.title),
        }
    }

    fn parse_entries(output: &str, requested_by: UserId) -> Vec<Track> {
        output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<VideoEntry>(line) {
                Ok(entry) => entry.into_track(requested_by),
                Err(e) => {
                    warn!("⚠️ Skipping malformed yt-dlp line: {}", e);
                    None
                }
            })
            .collect()
    }

    fn parse_playlist(output: &str, requested_by: UserId) -> Result<Vec<Track>> {
        let dump: PlaylistDump = serde_json::from_str(output)
            .map_err(|e| PlaybackError::resolution("playlist", e))?;

        Ok(dump
            .entries
            .into_iter()
            .filter_map(|entry| entry.into_track(requested_by))
            .collect())
    }
}

#[async_trait]
impl TrackResolver for YtDlpClient {
    async fn lookup(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PlaybackError::NotFound(String::new()));
        }

        let tracks = if Self::is_playlist_url(query) {
            info!("📋 Expanding playlist: {}", query);
            let output = self.run(query, &["-J", "--flat-playlist"]).await?;
            Self::parse_playlist(&output, requested_by)?
        } else if Self::is_url(query) {
            let output = self.run(query, &["-j", "--no-playlist"]).await?;
            Self::parse_entries(&output, requested_by)
        } else {
            info!("🔍 Searching: {}", query);
            let search = format!("ytsearch1:{}", query);
            let output = self.run(&search, &["-j", "--no-playlist"]).await?;
            Self::parse_entries(&output, requested_by)
        };

        if tracks.is_empty() {
            return Err(PlaybackError::NotFound(query.to_string()));
        }

        debug!("🎵 {} tracks for '{}'", tracks.len(), query);
        Ok(tracks)
    }
}

#[async_trait]
impl StreamResolver for YtDlpClient {
    async fn resolve(&self, track: &Track) -> Result<AudioResource> {
        let target = Self::stream_target(track);
        if track.source_url.is_none() {
            debug!("🔍 No source for {}, searching by title", track.title);
        }

        let output = self
            .run(&target, &["-f", "bestaudio/best", "-g", "--no-playlist"])
            .await?;

        let location = output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| PlaybackError::resolution(track.title.clone(), "yt-dlp returned no stream"))?;

        Ok(AudioResource::new(track.clone(), location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_playlist_url_detection() {
        assert!(YtDlpClient::is_playlist_url(
            "https://www.youtube.com/playlist?list=PLx0sYbCqOb8TBPRdmBHs5Iftvv9TPboYG"
        ));
        assert!(YtDlpClient::is_playlist_url(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=RDdQw4w9WgXcQ"
        ));
        assert!(YtDlpClient::is_playlist_url("https://soundcloud.com/artist/sets/album"));
        assert!(!YtDlpClient::is_playlist_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(!YtDlpClient::is_playlist_url("lofi list=chill"));
    }

    #[test]
    fn test_parse_single_entry() {
        let output = r#"{"title": "Never Gonna Give You Up", "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "duration": 212.4, "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/hq.jpg"}"#;
        let tracks = YtDlpClient::parse_entries(output, UserId::new(3));

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "Never Gonna Give You Up");
        assert_eq!(tracks[0].duration_seconds, 212);
        assert_eq!(
            tracks[0].source_url.as_deref(),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
        assert_eq!(tracks[0].requested_by, UserId::new(3));
    }

    #[test]
    fn test_parse_flat_playlist() {
        let output = r#"{"_type": "playlist", "entries": [
            {"title": "One", "url": "https://www.youtube.com/watch?v=1", "duration": 60, "thumbnails": [{"url": "small"}, {"url": "large"}]},
            {"title": "Two", "url": null},
            {"title": "Three", "url": "https://www.youtube.com/watch?v=3", "duration": null}
        ]}"#;
        let tracks = YtDlpClient::parse_playlist(output, UserId::new(1)).unwrap();

        let titles: Vec<&str> = tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["One", "Three"]);
        assert_eq!(tracks[0].thumbnail_url.as_deref(), Some("large"));
        assert_eq!(tracks[1].duration_seconds, 0);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let output = "not json\n{\"title\": \"ok\", \"webpage_url\": \"https://x.test/v\"}\n";
        let tracks = YtDlpClient::parse_entries(output, UserId::new(1));
        assert_eq!(tracks.len(), 1);
    }

    #[test]
    fn test_stream_target_falls_back_to_title_search() {
        let linked = Track::new("a", UserId::new(1)).with_source_url("https://x.test/v");
        assert_eq!(YtDlpClient::stream_target(&linked), "https://x.test/v");

        let bare = Track::new("Rick Astley Never Gonna Give You Up", UserId::new(1));
        assert_eq!(
            YtDlpClient::stream_target(&bare),
            "ytsearch1:Rick Astley Never Gonna Give You Up"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_without_source_url_searches() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("yt-dlp");
        std::fs::write(&binary, "#!/bin/sh\nfor last; do :; done\necho \"https://cdn.test/$last\"\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let client = YtDlpClient::new(binary.to_string_lossy(), Duration::from_secs(5));
        let track = Track::new("Never Gonna Give You Up", UserId::new(1));
        let resource = client.resolve(&track).await.unwrap();

        assert_eq!(resource.location, "https://cdn.test/ytsearch1:Never Gonna Give You Up");
        assert_eq!(resource.metadata, track);
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_resolution_failure() {
        let client = YtDlpClient::new("/nonexistent/yt-dlp", Duration::from_secs(5));
        let track = Track::new("a", UserId::new(1)).with_source_url("https://x.test/v");

        assert!(matches!(
            client.resolve(&track).await,
            Err(PlaybackError::ResolutionFailed { .. })
        ));
    }
}
