use chrono::{DateTime, Utc};
use serde::Serialize;
use serenity::model::id::UserId;
use std::time::Duration;

/// A queued song. Built by a track resolver and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub title: String,
    pub thumbnail_url: Option<String>,
    /// Page the stream is resolved from; may be filled in lazily.
    pub source_url: Option<String>,
    pub duration_seconds: u64,
    pub requested_by: UserId,
    pub requested_at: DateTime<Utc>,
}

impl Track {
    pub fn new(title: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            title: title.into(),
            thumbnail_url: None,
            source_url: None,
            duration_seconds: 0,
            requested_by,
            requested_at: Utc::now(),
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = seconds;
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }
}

/// A track bound to something the audio player can read.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioResource {
    pub metadata: Track,
    /// Direct stream location handed to the player.
    pub location: String,
}

impl AudioResource {
    pub fn new(metadata: Track, location: impl Into<String>) -> Self {
        Self {
            metadata,
            location: location.into(),
        }
    }
}
