use anyhow::Result;
use serenity::{
    model::{
        gateway::GatewayIntents,
        id::{ChannelId, GuildId, UserId},
    },
    Client,
};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};

use playback_session::audio::service::SubscriptionService;
use playback_session::bot::{discord::DiscordBot, ConsoleBot};
use playback_session::config::Config;
use playback_session::driver::{LoopbackDriver, SongbirdDriver};
use playback_session::sources::{SourceRouter, YtDlpClient};

const CONSOLE_GUILD: GuildId = GuildId::new(1);
const CONSOLE_CHANNEL: ChannelId = ChannelId::new(1);
const CONSOLE_USER: UserId = UserId::new(1);

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("playback_session=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("🎵 Starting playback-session v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    let sources = Arc::new(SourceRouter::new(YtDlpClient::new(
        config.ytdlp_path.clone(),
        config.resolver_timeout,
    )));

    match config.discord_token.clone() {
        Some(token) => run_discord(&config, &token, sources).await,
        None => run_console(&config, sources).await,
    }
}

async fn run_discord(config: &Config, token: &str, sources: Arc<SourceRouter>) -> Result<()> {
    let voice = Songbird::serenity();
    let driver = SongbirdDriver::new(voice.clone(), reqwest::Client::new());
    let service = Arc::new(SubscriptionService::new(
        Arc::new(driver),
        sources.clone(),
        sources,
        config,
    ));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(token, intents)
        .event_handler(DiscordBot::new(service.clone(), config.command_prefix.clone()))
        .register_songbird_with(voice)
        .await?;
    let shard_manager = client.shard_manager.clone();

    info!("🚀 Connecting to Discord");
    tokio::select! {
        result = client.start() => {
            if let Err(why) = result {
                error!("❌ Discord client error: {:?}", why);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("⚠️ Shutdown signal received, closing...");
            shard_manager.shutdown_all().await;
        }
    }

    service.shutdown();
    Ok(())
}

async fn run_console(config: &Config, sources: Arc<SourceRouter>) -> Result<()> {
    let service = Arc::new(SubscriptionService::new(
        Arc::new(LoopbackDriver::new(true)),
        sources.clone(),
        sources,
        config,
    ));

    let bot = ConsoleBot::new(service.clone(), CONSOLE_GUILD, CONSOLE_CHANNEL, CONSOLE_USER);
    println!("{}", playback_session::bot::commands::help_text());

    tokio::select! {
        result = bot.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => {
            if let Err(e) = result {
                error!("❌ Console error: {:?}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("⚠️ Shutdown signal received, closing...");
        }
    }

    service.shutdown();
    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("yt-dlp is not available at {}", config.ytdlp_path);
    }
}
