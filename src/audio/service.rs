use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    queue::{LoopMode, QueuePage},
    registry::SubscriptionRegistry,
    subscription::{PlaybackStatus, PlaybackSubscription},
    track::Track,
};
use crate::{
    config::{Config, PlaybackConfig},
    driver::VoiceDriver,
    error::{PlaybackError, Result},
    sources::{StreamResolver, TrackResolver},
};

/// Entry point for playback commands, keyed by guild.
///
/// Enqueue operations join the caller's channel and create a subscription on
/// first use; everything else needs an active session and fails with
/// [`PlaybackError::NotConnected`] otherwise.
pub struct SubscriptionService {
    registry: SubscriptionRegistry,
    driver: Arc<dyn VoiceDriver>,
    streams: Arc<dyn StreamResolver>,
    tracks: Arc<dyn TrackResolver>,
    playback: PlaybackConfig,
    page_size: usize,
    /// Serializes session creation so two first enqueues join only once.
    creating: Mutex<()>,
}

impl SubscriptionService {
    pub fn new(
        driver: Arc<dyn VoiceDriver>,
        streams: Arc<dyn StreamResolver>,
        tracks: Arc<dyn TrackResolver>,
        config: &Config,
    ) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            driver,
            streams,
            tracks,
            playback: config.playback.clone(),
            page_size: config.queue_page_size,
            creating: Mutex::new(()),
        }
    }

    async fn subscription_for(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<PlaybackSubscription>> {
        if let Some(subscription) = self.registry.get(guild_id) {
            return Ok(subscription);
        }

        let _creating = self.creating.lock().await;
        if let Some(subscription) = self.registry.get(guild_id) {
            return Ok(subscription);
        }

        info!("🔊 Joining channel {} in guild {}", channel_id, guild_id);
        let transport = self.driver.connect(guild_id, channel_id).await?;
        let player = self.driver.create_player(guild_id);
        let subscription = PlaybackSubscription::start(
            transport,
            player,
            self.streams.clone(),
            self.playback.clone(),
        );
        self.registry.put(guild_id, subscription.clone());
        Ok(subscription)
    }

    fn active(&self, guild_id: GuildId) -> Result<Arc<PlaybackSubscription>> {
        self.registry
            .get(guild_id)
            .ok_or(PlaybackError::NotConnected(guild_id))
    }

    pub async fn enqueue_track(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        track: Track,
    ) -> Result<()> {
        let subscription = self.subscription_for(guild_id, channel_id).await?;
        subscription.enqueue(track).await
    }

    /// Queues a pre-resolved batch and returns the tracks that fit.
    pub async fn enqueue_batch(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        tracks: Vec<Track>,
    ) -> Result<Vec<Track>> {
        let subscription = self.subscription_for(guild_id, channel_id).await?;
        let requested = tracks.len();
        let accepted = subscription.enqueue_many(tracks).await;
        if accepted.len() < requested {
            info!(
                "⚠️ Queue full in guild {}, kept {} of {} tracks",
                guild_id,
                accepted.len(),
                requested
            );
        }
        Ok(accepted)
    }

    /// Resolves `query` (URL, search phrase or playlist) and queues the result.
    ///
    /// Lookup happens before joining so a bad query never opens a connection.
    pub async fn enqueue_query(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        query: &str,
        requested_by: UserId,
    ) -> Result<Vec<Track>> {
        let mut tracks = self.tracks.lookup(query, requested_by).await?;
        debug!("🔍 '{}' resolved to {} tracks", query, tracks.len());

        match tracks.len() {
            0 => Err(PlaybackError::NotFound(query.to_string())),
            1 => {
                let track = tracks.remove(0);
                self.enqueue_track(guild_id, channel_id, track.clone()).await?;
                Ok(vec![track])
            }
            _ => self.enqueue_batch(guild_id, channel_id, tracks).await,
        }
    }

    pub fn skip_current(&self, guild_id: GuildId) -> Result<Option<Track>> {
        Ok(self.active(guild_id)?.skip_current())
    }

    pub fn skip_at(&self, guild_id: GuildId, position: usize) -> Result<Track> {
        self.active(guild_id)?.skip_at(position)
    }

    pub fn list_queue(&self, guild_id: GuildId) -> Result<Vec<Track>> {
        Ok(self.active(guild_id)?.queue())
    }

    pub fn queue_page(&self, guild_id: GuildId, page: usize) -> Result<QueuePage> {
        Ok(self.active(guild_id)?.queue_page(page, self.page_size))
    }

    pub fn status(&self, guild_id: GuildId) -> Result<PlaybackStatus> {
        Ok(self.active(guild_id)?.status())
    }

    /// Stops playback, clears the queue and forgets the session.
    pub fn stop(&self, guild_id: GuildId) -> Result<()> {
        let subscription = self.active(guild_id)?;
        subscription.stop();
        self.registry.remove(guild_id);
        Ok(())
    }

    pub fn pause(&self, guild_id: GuildId) -> Result<bool> {
        Ok(self.active(guild_id)?.pause())
    }

    pub fn resume(&self, guild_id: GuildId) -> Result<bool> {
        Ok(self.active(guild_id)?.resume())
    }

    pub fn toggle_shuffle(&self, guild_id: GuildId) -> Result<bool> {
        Ok(self.active(guild_id)?.toggle_shuffle())
    }

    pub fn toggle_loop_single(&self, guild_id: GuildId) -> Result<bool> {
        Ok(self.active(guild_id)?.toggle_loop_single())
    }

    pub fn toggle_loop_all(&self, guild_id: GuildId) -> Result<bool> {
        Ok(self.active(guild_id)?.toggle_loop_all())
    }

    pub fn toggle_loop(&self, guild_id: GuildId, mode: LoopMode) -> Result<bool> {
        match mode {
            LoopMode::Track => self.toggle_loop_single(guild_id),
            LoopMode::Queue => self.toggle_loop_all(guild_id),
        }
    }

    /// Registered sessions; a dead one counts until its next lookup.
    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Stops every session; used on process exit.
    pub fn shutdown(&self) {
        let subscriptions = self.registry.drain();
        info!("🛑 Stopping {} playback sessions", subscriptions.len());
        for subscription in subscriptions {
            subscription.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::AudioResource;
    use crate::driver::{LoopbackDriver, Transport};
    use crate::sources::MockTrackResolver;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl StreamResolver for Echo {
        async fn resolve(&self, track: &Track) -> Result<AudioResource> {
            Ok(AudioResource::new(track.clone(), "loopback://stream"))
        }
    }

    const GUILD: GuildId = GuildId::new(100);
    const CHANNEL: ChannelId = ChannelId::new(200);
    const USER: UserId = UserId::new(300);

    fn service_with(tracks: MockTrackResolver) -> (Arc<LoopbackDriver>, SubscriptionService) {
        let driver = Arc::new(LoopbackDriver::new(true));
        let service = SubscriptionService::new(
            driver.clone(),
            Arc::new(Echo),
            Arc::new(tracks),
            &Config::default(),
        );
        (driver, service)
    }

    fn service() -> (Arc<LoopbackDriver>, SubscriptionService) {
        service_with(MockTrackResolver::new())
    }

    fn track(title: &str) -> Track {
        Track::new(title, USER).with_duration(120)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_queries_without_session_are_not_connected() {
        let (_, service) = service();
        let not_connected = PlaybackError::NotConnected(GUILD);

        assert_eq!(service.status(GUILD).unwrap_err(), not_connected);
        assert_eq!(service.list_queue(GUILD).unwrap_err(), not_connected);
        assert_eq!(service.pause(GUILD).unwrap_err(), not_connected);
        assert_eq!(service.resume(GUILD).unwrap_err(), not_connected);
        assert_eq!(service.stop(GUILD).unwrap_err(), not_connected);
        assert_eq!(service.skip_current(GUILD).unwrap_err(), not_connected);
        assert_eq!(service.toggle_shuffle(GUILD).unwrap_err(), not_connected);
    }

    #[tokio::test]
    async fn test_enqueue_reuses_session() {
        let (driver, service) = service();
        service.enqueue_track(GUILD, CHANNEL, track("a")).await.unwrap();
        service.enqueue_track(GUILD, CHANNEL, track("b")).await.unwrap();

        assert_eq!(driver.connections(), 1);
        let status = service.status(GUILD).unwrap();
        assert_eq!(status.current_track.unwrap().title, "a");
        assert_eq!(status.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_enqueues_join_once() {
        let (driver, service) = service();
        let (a, b) = tokio::join!(
            service.enqueue_track(GUILD, CHANNEL, track("a")),
            service.enqueue_track(GUILD, CHANNEL, track("b")),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(driver.connections(), 1);
        assert_eq!(service.active_sessions(), 1);
    }

    #[tokio::test]
    async fn test_guilds_are_independent() {
        let (driver, service) = service();
        let other = GuildId::new(101);
        service.enqueue_track(GUILD, CHANNEL, track("a")).await.unwrap();
        service.enqueue_track(other, CHANNEL, track("b")).await.unwrap();

        assert!(service.toggle_shuffle(GUILD).unwrap());
        assert!(!service.status(other).unwrap().shuffle);
        assert_eq!(driver.connections(), 2);
    }

    #[tokio::test]
    async fn test_sessions_open_concurrently_across_guilds() {
        let (driver, service) = service();
        let enqueues = (1..=5).map(|guild| {
            service.enqueue_track(GuildId::new(guild), CHANNEL, track(&format!("t{}", guild)))
        });

        let results = futures::future::join_all(enqueues).await;

        assert!(results.iter().all(|result| result.is_ok()));
        assert_eq!(driver.connections(), 5);
        assert_eq!(service.active_sessions(), 5);
    }

    #[tokio::test]
    async fn test_stop_forgets_session() {
        let (driver, service) = service();
        service.enqueue_track(GUILD, CHANNEL, track("a")).await.unwrap();

        service.stop(GUILD).unwrap();
        assert_eq!(service.status(GUILD), Err(PlaybackError::NotConnected(GUILD)));
        assert!(driver.transport(GUILD).unwrap().state().is_destroyed());

        service.enqueue_track(GUILD, CHANNEL, track("b")).await.unwrap();
        assert_eq!(driver.connections(), 2);
    }

    #[tokio::test]
    async fn test_destroyed_session_is_replaced() {
        let (driver, service) = service();
        service.enqueue_track(GUILD, CHANNEL, track("a")).await.unwrap();

        driver.transport(GUILD).unwrap().destroy();
        settle().await;
        assert!(service.status(GUILD).is_err());

        service.enqueue_track(GUILD, CHANNEL, track("b")).await.unwrap();
        assert_eq!(driver.connections(), 2);
        assert_eq!(service.status(GUILD).unwrap().current_track.unwrap().title, "b");
    }

    #[tokio::test]
    async fn test_enqueue_query_batches_playlists() {
        let mut tracks = MockTrackResolver::new();
        tracks
            .expect_lookup()
            .withf(|query: &str, _| query == "https://www.youtube.com/playlist?list=PL1")
            .times(1)
            .returning(|_, user| {
                Ok(["a", "b", "c"]
                    .iter()
                    .map(|title| Track::new(*title, user))
                    .collect())
            });
        let (_, service) = service_with(tracks);

        let queued = service
            .enqueue_query(GUILD, CHANNEL, "https://www.youtube.com/playlist?list=PL1", USER)
            .await
            .unwrap();

        assert_eq!(queued.len(), 3);
        let status = service.status(GUILD).unwrap();
        assert_eq!(status.current_track.unwrap().title, "a");
        assert_eq!(status.queue.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_query_does_not_join() {
        let mut tracks = MockTrackResolver::new();
        tracks
            .expect_lookup()
            .returning(|query, _| Err(PlaybackError::NotFound(query.to_string())));
        let (driver, service) = service_with(tracks);

        let result = service.enqueue_query(GUILD, CHANNEL, "zzzz", USER).await;

        assert_eq!(result, Err(PlaybackError::NotFound("zzzz".to_string())));
        assert_eq!(driver.connections(), 0);
    }

    #[tokio::test]
    async fn test_toggle_loop_modes() {
        let (_, service) = service();
        service.enqueue_track(GUILD, CHANNEL, track("a")).await.unwrap();

        assert!(service.toggle_loop(GUILD, LoopMode::Track).unwrap());
        assert!(service.toggle_loop(GUILD, LoopMode::Queue).unwrap());
        let status = service.status(GUILD).unwrap();
        assert!(status.loop_single && status.loop_all);

        assert!(!service.toggle_loop(GUILD, LoopMode::Track).unwrap());
    }

    #[tokio::test]
    async fn test_queue_page_uses_configured_size() {
        let (_, service) = service();
        let batch: Vec<Track> = (0..13).map(|n| track(&format!("t{}", n))).collect();
        service.enqueue_batch(GUILD, CHANNEL, batch).await.unwrap();

        let page = service.queue_page(GUILD, 3).unwrap();
        assert_eq!(page.total_items, 12);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.first_position, 11);
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let (driver, service) = service();
        service.enqueue_track(GUILD, CHANNEL, track("a")).await.unwrap();
        service.enqueue_track(GuildId::new(7), CHANNEL, track("b")).await.unwrap();

        service.shutdown();

        assert_eq!(service.active_sessions(), 0);
        assert!(driver.transport(GUILD).unwrap().state().is_destroyed());
    }
}
