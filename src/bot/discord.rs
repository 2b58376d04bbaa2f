use serenity::{
    async_trait,
    model::{
        channel::Message,
        gateway::Ready,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::{Context, EventHandler},
};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{commands, commands::Command, handlers, Invocation};
use crate::audio::service::SubscriptionService;

/// Answers prefixed guild messages such as `!play never gonna give you up`.
pub struct DiscordBot {
    service: Arc<SubscriptionService>,
    prefix: String,
}

impl DiscordBot {
    pub fn new(service: Arc<SubscriptionService>, prefix: impl Into<String>) -> Self {
        Self {
            service,
            prefix: prefix.into(),
        }
    }

    /// The command text of a message, if it is addressed to the bot.
    fn command_line<'a>(&self, content: &'a str) -> Option<&'a str> {
        content
            .trim_start()
            .strip_prefix(self.prefix.as_str())
            .map(str::trim)
    }

    fn voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        let guild = ctx.cache.guild(guild_id)?;
        guild
            .voice_states
            .get(&user_id)
            .and_then(|state| state.channel_id)
    }
}

#[async_trait]
impl EventHandler for DiscordBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("✅ {} connected to {} guilds", ready.user.name, ready.guilds.len());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(line) = self.command_line(&msg.content) else {
            return;
        };

        let reply = match (msg.guild_id, line.parse::<Command>()) {
            (_, Ok(Command::Quit)) | (_, Err(commands::ParseError::Empty)) => return,
            (None, _) => "❌ You can't play music in direct messages!".to_string(),
            (Some(_), Err(e)) => {
                debug!("Unparseable message {:?}: {}", line, e);
                format!("❓ {}", e)
            }
            (Some(guild_id), Ok(command)) => {
                let invocation = Invocation {
                    guild_id,
                    user_id: msg.author.id,
                    voice_channel: Self::voice_channel(&ctx, guild_id, msg.author.id),
                };
                handlers::handle_command(&self.service, &invocation, command).await
            }
        };

        if let Err(e) = msg.channel_id.say(&ctx.http, reply).await {
            error!("❌ Could not reply in channel {}: {:?}", msg.channel_id, e);
        }
    }
}
