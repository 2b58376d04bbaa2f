use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::io::BufReader;

use playback_session::audio::service::SubscriptionService;
use playback_session::audio::track::{AudioResource, Track};
use playback_session::bot::{commands::Command, handlers::handle_command, ConsoleBot, Invocation};
use playback_session::config::Config;
use playback_session::driver::{LoopbackDriver, Transport};
use playback_session::error::{PlaybackError, Result};
use playback_session::sources::{StreamResolver, TrackResolver};

const GUILD: GuildId = GuildId::new(42);

/// Every query is one three-minute track named after it; `missing` finds nothing,
/// `mix` is a three-track playlist.
struct FakeCatalog;

#[async_trait]
impl TrackResolver for FakeCatalog {
    async fn lookup(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>> {
        let titles: Vec<String> = match query {
            "missing" => return Err(PlaybackError::NotFound(query.to_string())),
            "mix" => (1..=3).map(|n| format!("mix-{}", n)).collect(),
            other => vec![other.to_string()],
        };
        Ok(titles
            .into_iter()
            .map(|title| {
                let url = format!("https://tracks.test/{}", title);
                Track::new(title, requested_by)
                    .with_duration(180)
                    .with_source_url(url)
            })
            .collect())
    }
}

#[async_trait]
impl StreamResolver for FakeCatalog {
    async fn resolve(&self, track: &Track) -> Result<AudioResource> {
        if track.title == "broken" {
            return Err(PlaybackError::resolution(track.title.clone(), "gone"));
        }
        Ok(AudioResource::new(track.clone(), "loopback://stream"))
    }
}

fn setup() -> (Arc<LoopbackDriver>, ConsoleBot) {
    let driver = Arc::new(LoopbackDriver::new(true));
    let catalog = Arc::new(FakeCatalog);
    let service = Arc::new(SubscriptionService::new(
        driver.clone(),
        catalog.clone(),
        catalog,
        &Config::default(),
    ));
    let bot = ConsoleBot::new(service, GUILD, ChannelId::new(7), UserId::new(9));
    (driver, bot)
}

async fn send(bot: &ConsoleBot, line: &str) -> String {
    let command: Command = line.parse().unwrap();
    let reply = handle_command(&bot.service, &bot.invocation(), command).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    reply
}

#[tokio::test(start_paused = true)]
async fn test_session_lifecycle_through_commands() {
    let (driver, bot) = setup();

    assert_eq!(
        send(&bot, "now").await,
        "❌ The bot is not connected to a voice channel!"
    );

    assert_eq!(send(&bot, "play first").await, "✅ Added first to the queue");
    assert_eq!(send(&bot, "play mix").await, "✅ Added 3 tracks to the queue");
    assert_eq!(driver.connections(), 1);

    let queue = send(&bot, "queue").await;
    assert!(queue.contains("Now playing: first"));
    assert!(queue.contains("1. mix-1"));
    assert!(queue.contains("3. mix-3"));

    assert_eq!(send(&bot, "skip 2").await, "⏭️ Skipped mix-2");
    assert_eq!(
        send(&bot, "skip 9").await,
        "❌ The given index is out of bounds of the queue"
    );

    assert_eq!(send(&bot, "skip").await, "⏭️ Skipped first");
    assert!(send(&bot, "now").await.contains("mix-1"));

    assert_eq!(send(&bot, "loop track").await, "🔂 Track loop on");
    assert_eq!(send(&bot, "pause").await, "⏸️ Paused");
    assert_eq!(send(&bot, "resume").await, "▶️ Resumed");

    assert_eq!(
        send(&bot, "stop").await,
        "⏹️ Stopped playback and cleared the queue"
    );
    assert!(driver.transport(GUILD).unwrap().state().is_destroyed());
    assert_eq!(
        send(&bot, "queue").await,
        "❌ The bot is not connected to a voice channel!"
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_query_reports_not_found() {
    let (driver, bot) = setup();

    assert_eq!(send(&bot, "play missing").await, "❌ Nothing found for `missing`");
    assert_eq!(driver.connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_play_requires_a_voice_channel() {
    let (driver, bot) = setup();
    let outside = Invocation {
        voice_channel: None,
        ..bot.invocation()
    };

    let reply = handle_command(&bot.service, &outside, "play first".parse().unwrap()).await;
    assert_eq!(reply, "❌ You must join a voice channel to use this command!");
    assert_eq!(driver.connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unplayable_track_is_dropped() {
    let (_, bot) = setup();

    send(&bot, "play broken").await;
    send(&bot, "play after").await;

    let status = bot.service.status(GUILD).unwrap();
    assert_eq!(status.current_track.unwrap().title, "after");
    assert!(status.queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_tracks_play_out_and_session_ends() {
    let (driver, bot) = setup();

    send(&bot, "play one").await;
    send(&bot, "play two").await;

    tokio::time::sleep(Duration::from_secs(181)).await;
    assert_eq!(
        bot.service.status(GUILD).unwrap().current_track.unwrap().title,
        "two"
    );

    tokio::time::sleep(Duration::from_secs(181)).await;
    assert!(driver.transport(GUILD).unwrap().state().is_destroyed());
    assert!(bot.service.status(GUILD).is_err());
}

#[tokio::test]
async fn test_console_script_stops_at_quit() {
    let (_, bot) = setup();
    let script = "play intro\n\nshuffle\nbogus\nquit\nstop\n";
    let mut output = Vec::new();

    bot.run(BufReader::new(script.as_bytes()), &mut output)
        .await
        .unwrap();

    let replies = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = replies.lines().collect();
    assert_eq!(
        lines,
        vec![
            "✅ Added intro to the queue",
            "🔀 Shuffle on",
            "❓ unknown command `bogus`, try `help`",
        ]
    );
    assert!(bot.service.status(GUILD).is_ok());
}
