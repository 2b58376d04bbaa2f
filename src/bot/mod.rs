//! # Bot Module
//!
//! Command adapters over [`SubscriptionService`].
//!
//! Each line is parsed into a [`Command`](commands::Command), dispatched by
//! [`handlers::handle_command`] for an [`Invocation`], and the reply written
//! back. Typed failures come back as their user-facing message.
//!
//! - [`ConsoleBot`]: stdin/stdout, one fixed guild, channel and user
//! - [`discord::DiscordBot`]: prefixed messages in Discord guild channels

pub mod commands;
pub mod discord;
pub mod handlers;

use anyhow::Result;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::audio::service::SubscriptionService;
use commands::Command;

/// Who issued a command, and which voice channel they were in at the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub voice_channel: Option<ChannelId>,
}

/// A console session acting as one user in one guild's voice channel.
pub struct ConsoleBot {
    pub service: Arc<SubscriptionService>,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
}

impl ConsoleBot {
    pub fn new(
        service: Arc<SubscriptionService>,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Self {
        Self {
            service,
            guild_id,
            channel_id,
            user_id,
        }
    }

    pub fn invocation(&self) -> Invocation {
        Invocation {
            guild_id: self.guild_id,
            user_id: self.user_id,
            voice_channel: Some(self.channel_id),
        }
    }

    /// Reads commands until `quit` or end of input.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        info!("⌨️ Console ready for guild {}", self.guild_id);

        while let Some(line) = lines.next_line().await? {
            let reply = match line.parse::<Command>() {
                Ok(Command::Quit) => break,
                Ok(command) => {
                    handlers::handle_command(&self.service, &self.invocation(), command).await
                }
                Err(commands::ParseError::Empty) => continue,
                Err(e) => {
                    debug!("Unparseable input {:?}: {}", line, e);
                    format!("❓ {}", e)
                }
            };

            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }

        info!("👋 Console closed for guild {}", self.guild_id);
        Ok(())
    }
}
