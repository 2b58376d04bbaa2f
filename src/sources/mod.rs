pub mod direct_url;
pub mod ytdlp;

use async_trait::async_trait;
use serenity::model::id::UserId;
use tracing::debug;

use crate::audio::track::{AudioResource, Track};
use crate::error::Result;

pub use direct_url::DirectUrlClient;
pub use ytdlp::YtDlpClient;

/// Turns a URL, search phrase or playlist page into tracks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Fails with `NotFound` when nothing matches.
    async fn lookup(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>>;
}

/// Opens a playable stream for a track.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Fails with `ResolutionFailed`; callers do not tell causes apart.
    async fn resolve(&self, track: &Track) -> Result<AudioResource>;
}

/// Sends direct audio links to [`DirectUrlClient`] and everything else to yt-dlp.
pub struct SourceRouter {
    direct_url: DirectUrlClient,
    ytdlp: YtDlpClient,
}

impl SourceRouter {
    pub fn new(ytdlp: YtDlpClient) -> Self {
        Self {
            direct_url: DirectUrlClient::new(),
            ytdlp,
        }
    }
}

#[async_trait]
impl TrackResolver for SourceRouter {
    async fn lookup(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>> {
        if DirectUrlClient::is_valid_url(query) {
            debug!("🔗 Direct audio link: {}", query);
            return self.direct_url.lookup(query, requested_by).await;
        }
        self.ytdlp.lookup(query, requested_by).await
    }
}

#[async_trait]
impl StreamResolver for SourceRouter {
    async fn resolve(&self, track: &Track) -> Result<AudioResource> {
        match track.source_url.as_deref() {
            Some(url) if DirectUrlClient::is_valid_url(url) => self.direct_url.resolve(track).await,
            _ => self.ytdlp.resolve(track).await,
        }
    }
}
