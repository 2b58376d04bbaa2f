use async_trait::async_trait;
use serenity::model::id::UserId;
use url::Url;

use super::{StreamResolver, TrackResolver};
use crate::audio::track::{AudioResource, Track};
use crate::error::{PlaybackError, Result};

const AUDIO_EXTENSIONS: [&str; 6] = [".mp3", ".wav", ".ogg", ".flac", ".m4a", ".opus"];

/// Plain http(s) links to audio files; the link is the stream.
#[derive(Debug, Default)]
pub struct DirectUrlClient;

impl DirectUrlClient {
    pub fn new() -> Self {
        Self
    }

    pub fn is_valid_url(url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }

        let path = parsed.path().to_lowercase();
        AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }

    /// Last path segment without its extension, or the host.
    fn title_for(url: &Url) -> String {
        url.path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .and_then(|file| file.rsplit_once('.').map(|(stem, _)| stem.to_string()))
            .filter(|stem| !stem.is_empty())
            .or_else(|| url.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string())
    }
}

#[async_trait]
impl TrackResolver for DirectUrlClient {
    async fn lookup(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>> {
        if !Self::is_valid_url(query) {
            return Err(PlaybackError::NotFound(query.to_string()));
        }
        let url = Url::parse(query).map_err(|e| PlaybackError::resolution(query, e))?;

        Ok(vec![Track::new(Self::title_for(&url), requested_by).with_source_url(query)])
    }
}

#[async_trait]
impl StreamResolver for DirectUrlClient {
    async fn resolve(&self, track: &Track) -> Result<AudioResource> {
        match track.source_url.as_deref() {
            Some(url) if Self::is_valid_url(url) => Ok(AudioResource::new(track.clone(), url)),
            _ => Err(PlaybackError::resolution(
                track.title.clone(),
                "not a direct audio link",
            )),
        }
    }
}
