use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::debug;

use super::subscription::PlaybackSubscription;

/// Guild -> live subscription. The only place a guild's session is looked up.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: DashMap<GuildId, Arc<PlaybackSubscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live subscription for `guild_id`.
    ///
    /// A subscription whose transport is gone is evicted here and never returned.
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSubscription>> {
        let subscription = self.subscriptions.get(&guild_id)?.value().clone();
        if !subscription.is_defunct() {
            return Some(subscription);
        }

        // Only evict the entry we inspected; a fresh one may have been put meanwhile.
        self.subscriptions
            .remove_if(&guild_id, |_, stored| Arc::ptr_eq(stored, &subscription));
        debug!("🧹 Evicted defunct subscription for guild {}", guild_id);
        None
    }

    pub fn put(&self, guild_id: GuildId, subscription: Arc<PlaybackSubscription>) {
        self.subscriptions.insert(guild_id, subscription);
    }

    pub fn remove(&self, guild_id: GuildId) -> Option<Arc<PlaybackSubscription>> {
        self.subscriptions
            .remove(&guild_id)
            .map(|(_, subscription)| subscription)
    }

    /// Stored entries, defunct ones included.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Removes and returns every subscription.
    pub fn drain(&self) -> Vec<Arc<PlaybackSubscription>> {
        let guild_ids: Vec<GuildId> = self.subscriptions.iter().map(|entry| *entry.key()).collect();
        guild_ids
            .into_iter()
            .filter_map(|guild_id| self.remove(guild_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::{AudioResource, Track};
    use crate::config::PlaybackConfig;
    use crate::driver::{LoopbackPlayer, LoopbackTransport, Transport};
    use crate::error::Result;
    use crate::sources::StreamResolver;
    use async_trait::async_trait;
    use serenity::model::id::ChannelId;

    struct Echo;

    #[async_trait]
    impl StreamResolver for Echo {
        async fn resolve(&self, track: &Track) -> Result<AudioResource> {
            Ok(AudioResource::new(track.clone(), "loopback://stream"))
        }
    }

    fn subscription(guild: u64) -> (Arc<LoopbackTransport>, Arc<PlaybackSubscription>) {
        let transport = LoopbackTransport::new(GuildId::new(guild), ChannelId::new(1), true);
        transport.set_state(crate::audio::state::TransportState::Ready);
        let subscription = PlaybackSubscription::start(
            transport.clone(),
            Arc::new(LoopbackPlayer::new()),
            Arc::new(Echo),
            PlaybackConfig::default(),
        );
        (transport, subscription)
    }

    #[tokio::test]
    async fn test_get_put_remove() {
        let registry = SubscriptionRegistry::new();
        let guild_id = GuildId::new(10);
        assert!(registry.get(guild_id).is_none());

        let (_transport, sub) = subscription(10);
        registry.put(guild_id, sub.clone());
        assert!(Arc::ptr_eq(&registry.get(guild_id).unwrap(), &sub));
        assert!(registry.get(GuildId::new(11)).is_none());

        assert!(registry.remove(guild_id).is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_destroyed_subscription_is_evicted_on_get() {
        let registry = SubscriptionRegistry::new();
        let guild_id = GuildId::new(10);
        let (transport, sub) = subscription(10);
        registry.put(guild_id, sub);

        transport.destroy();

        assert!(registry.get(guild_id).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_drain_empties_registry() {
        let registry = SubscriptionRegistry::new();
        for guild in [1, 2, 3] {
            registry.put(GuildId::new(guild), subscription(guild).1);
        }

        assert_eq!(registry.drain().len(), 3);
        assert!(registry.is_empty());
    }
}
