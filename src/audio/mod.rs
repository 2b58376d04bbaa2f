//! # Audio Module
//!
//! Per-guild playback sessions: queue, loop/shuffle policy, and supervision of
//! the voice connection that carries the audio.
//!
//! ## Architecture
//!
//! ### [`subscription`] - Playback Subscription
//! - Owns one guild's queue, transport and audio player
//! - Advances the queue when the player goes idle, one advance at a time
//! - Rejoins dropped connections with a linear backoff and gives up after a budget
//!
//! ### [`queue`] - Queue Management
//! - FIFO by default, uniform random picks under shuffle
//! - Track loop replays the last started track, queue loop rotates finished tracks
//!
//! ### [`state`] - State Machines
//! - Transport and player states and the pure rules mapping them to actions
//!
//! ### [`registry`] and [`service`]
//! - Guild -> subscription lookup with lazy eviction of dead sessions
//! - The command-facing service that creates sessions on first enqueue
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use playback_session::audio::{service::SubscriptionService, track::Track};
//! use playback_session::config::Config;
//! use playback_session::driver::LoopbackDriver;
//! use playback_session::sources::{SourceRouter, YtDlpClient};
//! use serenity::model::id::{ChannelId, GuildId, UserId};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let sources = Arc::new(SourceRouter::new(YtDlpClient::new(
//!     config.ytdlp_path.clone(),
//!     config.resolver_timeout,
//! )));
//! let service = SubscriptionService::new(
//!     Arc::new(LoopbackDriver::new(true)),
//!     sources.clone(),
//!     sources,
//!     &config,
//! );
//!
//! let guild_id = GuildId::new(123456789);
//! service
//!     .enqueue_query(guild_id, ChannelId::new(1), "lofi hip hop", UserId::new(1))
//!     .await?;
//! service.pause(guild_id)?;
//! service.skip_current(guild_id)?;
//! # Ok(())
//! # }
//! ```

pub mod queue;
pub mod registry;
pub mod service;
pub mod state;
pub mod subscription;
pub mod track;

pub use queue::{LoopMode, MusicQueue, QueuePage};
pub use service::SubscriptionService;
pub use subscription::{PlaybackStatus, PlaybackSubscription};
pub use track::{AudioResource, Track};
