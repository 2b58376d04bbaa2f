//! In-process voice driver.
//!
//! [`LoopbackTransport`] walks Signalling -> Connecting -> Ready on connect and
//! otherwise only changes state when told to, which makes disconnect storms
//! easy to script. [`LoopbackPlayer`] "plays" each resource for the track's
//! duration on the tokio clock, three minutes when the length is unknown.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;

use super::{AudioPlayer, Transport, TransportStatus, VoiceDriver, EVENT_CAPACITY};
use crate::audio::state::{DisconnectReason, PlayerState, StateChange, TransportState};
use crate::audio::track::AudioResource;
use crate::error::Result;

const PLAYBACK_TICK: Duration = Duration::from_millis(250);
/// Play time for tracks whose length the resolver did not report.
const UNKNOWN_LENGTH: Duration = Duration::from_secs(180);

pub struct LoopbackTransport {
    channel_id: ChannelId,
    status: TransportStatus,
    auto_ready: bool,
    player: Mutex<Option<Arc<dyn AudioPlayer>>>,
}

impl LoopbackTransport {
    /// A connection in Signalling. With `auto_ready` every join and rejoin
    /// completes immediately.
    pub fn new(guild_id: GuildId, channel_id: ChannelId, auto_ready: bool) -> Arc<Self> {
        Arc::new(Self {
            channel_id,
            status: TransportStatus::new(guild_id),
            auto_ready,
            player: Mutex::new(None),
        })
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Moves to `new` and broadcasts the change. Destroyed is final.
    pub fn set_state(&self, new: TransportState) {
        self.status.set(new);
    }

    pub fn disconnect(&self, reason: DisconnectReason, close_code: Option<u16>) {
        self.set_state(TransportState::Disconnected { reason, close_code });
    }

    pub fn has_player(&self) -> bool {
        self.player.lock().is_some()
    }

    fn complete_join(&self) {
        if self.auto_ready {
            self.set_state(TransportState::Connecting);
            self.set_state(TransportState::Ready);
        }
    }
}

impl Transport for LoopbackTransport {
    fn guild_id(&self) -> GuildId {
        self.status.guild_id
    }

    fn state(&self) -> TransportState {
        self.status.get()
    }

    fn state_changes(&self) -> broadcast::Receiver<StateChange<TransportState>> {
        self.status.subscribe()
    }

    fn rejoin_attempts(&self) -> u32 {
        self.status.rejoin_attempts()
    }

    fn rejoin(&self) -> bool {
        if !self.status.begin_rejoin() {
            return false;
        }
        self.complete_join();
        true
    }

    fn destroy(&self) {
        self.set_state(TransportState::Destroyed);
        self.player.lock().take();
    }

    fn subscribe(&self, player: Arc<dyn AudioPlayer>) {
        *self.player.lock() = Some(player);
    }
}

struct PlayerSlot {
    state: PlayerState,
    /// Bumped on every play/stop so stale playback tasks bow out.
    generation: u64,
}

struct PlayerInner {
    slot: Mutex<PlayerSlot>,
    events: broadcast::Sender<StateChange<PlayerState>>,
}

impl PlayerInner {
    fn transition(&self, slot: &mut PlayerSlot, new: PlayerState) {
        let old = std::mem::replace(&mut slot.state, new.clone());
        let _ = self.events.send(StateChange { old, new });
    }

    fn finish(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.generation != generation || slot.state.is_idle() {
            return false;
        }
        slot.generation += 1;
        self.transition(&mut slot, PlayerState::Idle);
        true
    }
}

#[derive(Clone)]
pub struct LoopbackPlayer {
    inner: Arc<PlayerInner>,
}

impl LoopbackPlayer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(PlayerInner {
                slot: Mutex::new(PlayerSlot {
                    state: PlayerState::Idle,
                    generation: 0,
                }),
                events,
            }),
        }
    }

    /// Ends the bound resource as if it ran to completion.
    pub fn finish_current(&self) -> bool {
        let generation = self.inner.slot.lock().generation;
        self.inner.finish(generation)
    }

    async fn drive(inner: Arc<PlayerInner>, generation: u64, length: Duration) {
        let mut elapsed = Duration::ZERO;
        while elapsed < length {
            tokio::time::sleep(PLAYBACK_TICK).await;
            let slot = inner.slot.lock();
            if slot.generation != generation {
                return;
            }
            if matches!(slot.state, PlayerState::Playing(_)) {
                elapsed += PLAYBACK_TICK;
            }
        }
        inner.finish(generation);
    }
}

impl Default for LoopbackPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPlayer for LoopbackPlayer {
    fn state(&self) -> PlayerState {
        self.inner.slot.lock().state.clone()
    }

    fn state_changes(&self) -> broadcast::Receiver<StateChange<PlayerState>> {
        self.inner.events.subscribe()
    }

    fn play(&self, resource: AudioResource) {
        let length = match resource.metadata.duration() {
            length if length.is_zero() => UNKNOWN_LENGTH,
            length => length,
        };
        let generation = {
            let mut slot = self.inner.slot.lock();
            slot.generation += 1;
            self.inner
                .transition(&mut slot, PlayerState::Playing(resource.metadata));
            slot.generation
        };

        tokio::spawn(Self::drive(self.inner.clone(), generation, length));
    }

    fn pause(&self) -> bool {
        let mut slot = self.inner.slot.lock();
        match slot.state.clone() {
            PlayerState::Playing(track) | PlayerState::Buffering(track) => {
                self.inner.transition(&mut slot, PlayerState::Paused(track));
                true
            }
            _ => false,
        }
    }

    fn unpause(&self) -> bool {
        let mut slot = self.inner.slot.lock();
        match slot.state.clone() {
            PlayerState::Paused(track) => {
                self.inner.transition(&mut slot, PlayerState::Playing(track));
                true
            }
            _ => false,
        }
    }

    fn stop(&self, _force: bool) -> bool {
        let mut slot = self.inner.slot.lock();
        if slot.state.is_idle() {
            return false;
        }
        slot.generation += 1;
        self.inner.transition(&mut slot, PlayerState::Idle);
        true
    }
}

/// Hands out loopback transports and players.
pub struct LoopbackDriver {
    auto_ready: bool,
    transports: Mutex<Vec<Arc<LoopbackTransport>>>,
}

impl LoopbackDriver {
    pub fn new(auto_ready: bool) -> Self {
        Self {
            auto_ready,
            transports: Mutex::new(Vec::new()),
        }
    }

    /// Most recent transport opened for `guild_id`.
    pub fn transport(&self, guild_id: GuildId) -> Option<Arc<LoopbackTransport>> {
        self.transports
            .lock()
            .iter()
            .rev()
            .find(|transport| transport.guild_id() == guild_id)
            .cloned()
    }

    pub fn connections(&self) -> usize {
        self.transports.lock().len()
    }
}

#[async_trait]
impl VoiceDriver for LoopbackDriver {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Arc<dyn Transport>> {
        let transport = LoopbackTransport::new(guild_id, channel_id, self.auto_ready);
        transport.complete_join();
        self.transports.lock().push(transport.clone());
        Ok(transport)
    }

    fn create_player(&self, _guild_id: GuildId) -> Arc<dyn AudioPlayer> {
        Arc::new(LoopbackPlayer::new())
    }
}
