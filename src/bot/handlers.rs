use tracing::{error, info};

use super::{commands::help_text, commands::Command, Invocation};
use crate::audio::queue::LoopMode;
use crate::audio::service::SubscriptionService;
use crate::error::{PlaybackError, Result};
use crate::ui::format;

struct Handler<'a> {
    service: &'a SubscriptionService,
    invocation: &'a Invocation,
}

/// Runs one command and returns the reply text.
pub async fn handle_command(
    service: &SubscriptionService,
    invocation: &Invocation,
    command: Command,
) -> String {
    info!("⌨️ Command in guild {}: {:?}", invocation.guild_id, command);
    let bot = Handler {
        service,
        invocation,
    };

    let result = match command {
        Command::Play(query) => handle_play(&bot, &query).await,
        Command::Skip(index) => handle_skip(&bot, index),
        Command::Queue(page) => handle_queue(&bot, page),
        Command::NowPlaying => handle_nowplaying(&bot),
        Command::Pause => handle_pause(&bot),
        Command::Resume => handle_resume(&bot),
        Command::Stop => handle_stop(&bot),
        Command::Shuffle => handle_shuffle(&bot),
        Command::Loop(mode) => handle_loop(&bot, mode),
        Command::Help => Ok(help_text().to_string()),
        Command::Quit => Ok("👋 Bye".to_string()),
    };

    result.unwrap_or_else(|e| {
        error!("Command failed: {}", e);
        format!("❌ {}", e.user_message())
    })
}

async fn handle_play(bot: &Handler<'_>, query: &str) -> Result<String> {
    let channel_id = bot
        .invocation
        .voice_channel
        .ok_or(PlaybackError::NotInVoiceChannel)?;
    let queued = bot
        .service
        .enqueue_query(bot.invocation.guild_id, channel_id, query, bot.invocation.user_id)
        .await?;

    Ok(match queued.as_slice() {
        [] => "⚠️ The queue is full, nothing was added".to_string(),
        [track] => format!("✅ Added {} to the queue", track.title),
        tracks => format!("✅ Added {} tracks to the queue", tracks.len()),
    })
}

fn handle_skip(bot: &Handler<'_>, index: Option<usize>) -> Result<String> {
    let skipped = match index {
        Some(position) => Some(bot.service.skip_at(bot.invocation.guild_id, position)?),
        None => bot.service.skip_current(bot.invocation.guild_id)?,
    };

    Ok(match skipped {
        Some(track) => format!("⏭️ Skipped {}", track.title),
        None => "❌ There is nothing to skip!".to_string(),
    })
}

fn handle_queue(bot: &Handler<'_>, page: usize) -> Result<String> {
    let status = bot.service.status(bot.invocation.guild_id)?;
    let page = bot.service.queue_page(bot.invocation.guild_id, page)?;
    Ok(format::queue_page(&status, &page))
}

fn handle_nowplaying(bot: &Handler<'_>) -> Result<String> {
    let status = bot.service.status(bot.invocation.guild_id)?;
    Ok(format::now_playing(&status))
}

fn handle_pause(bot: &Handler<'_>) -> Result<String> {
    Ok(if bot.service.pause(bot.invocation.guild_id)? {
        "⏸️ Paused".to_string()
    } else {
        "❌ Nothing to pause".to_string()
    })
}

fn handle_resume(bot: &Handler<'_>) -> Result<String> {
    Ok(if bot.service.resume(bot.invocation.guild_id)? {
        "▶️ Resumed".to_string()
    } else {
        "❌ Nothing to resume".to_string()
    })
}

fn handle_stop(bot: &Handler<'_>) -> Result<String> {
    bot.service.stop(bot.invocation.guild_id)?;
    Ok("⏹️ Stopped playback and cleared the queue".to_string())
}

fn handle_shuffle(bot: &Handler<'_>) -> Result<String> {
    Ok(if bot.service.toggle_shuffle(bot.invocation.guild_id)? {
        "🔀 Shuffle on".to_string()
    } else {
        "➡️ Shuffle off".to_string()
    })
}

fn handle_loop(bot: &Handler<'_>, mode: LoopMode) -> Result<String> {
    let enabled = bot.service.toggle_loop(bot.invocation.guild_id, mode)?;
    let message = match (mode, enabled) {
        (LoopMode::Track, true) => "🔂 Track loop on",
        (LoopMode::Track, false) => "➡️ Track loop off",
        (LoopMode::Queue, true) => "🔁 Queue loop on",
        (LoopMode::Queue, false) => "➡️ Queue loop off",
    };
    Ok(message.to_string())
}
