//! # Playback Errors
//!
//! Typed failures surfaced by the subscription layer. Resolution failures are
//! mostly absorbed by the queue advance loop; the remaining variants reach the
//! command adapter, which renders them with [`PlaybackError::user_message`].

use serenity::model::id::GuildId;
use thiserror::Error;

/// Errors produced by playback sessions and their collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// The operation needs an active session in the guild and there is none.
    #[error("not connected to a voice channel in guild {0}")]
    NotConnected(GuildId),

    /// The caller has to be in a voice channel for the bot to join it.
    #[error("user is not in a voice channel")]
    NotInVoiceChannel,

    /// A 1-based queue position outside `[1, len]`.
    #[error("queue position {position} is out of bounds of queue of length {len}")]
    IndexOutOfBounds { position: usize, len: usize },

    /// A track or query could not be turned into playable audio.
    #[error("could not resolve '{target}': {reason}")]
    ResolutionFailed { target: String, reason: String },

    /// The track resolver found nothing for the query.
    #[error("no tracks found for '{0}'")]
    NotFound(String),

    /// The voice connection exhausted its retry or timeout budget.
    #[error("voice connection lost in guild {guild_id}: {reason}")]
    ConnectionLost { guild_id: GuildId, reason: String },

    #[error("queue is full (max {capacity} tracks)")]
    QueueFull { capacity: usize },

    /// Joining the voice channel failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl PlaybackError {
    pub fn resolution(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::ResolutionFailed {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Short reply text for the person who issued the command.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConnected(_) => "The bot is not connected to a voice channel!".to_string(),
            Self::NotInVoiceChannel => "You must join a voice channel to use this command!".to_string(),
            Self::IndexOutOfBounds { .. } => "The given index is out of bounds of the queue".to_string(),
            Self::NotFound(query) => format!("Nothing found for `{}`", query),
            Self::QueueFull { capacity } => format!("The queue is full ({} tracks max)", capacity),
            Self::ConnectionLost { .. } => "Lost the voice connection, playback stopped".to_string(),
            Self::ResolutionFailed { .. } | Self::Transport(_) => "Something went wrong!".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
