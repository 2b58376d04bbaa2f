//! Discord voice through songbird.
//!
//! [`SongbirdTransport`] mirrors a [`songbird::Call`]'s driver events into
//! [`TransportState`]s. [`SongbirdPlayer`] streams each resource's location
//! over HTTP into the guild's call and reports Idle when the track ends.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinError,
    events::{context_data::DisconnectReason as VoiceDisconnectReason, CoreEvent},
    input::{HttpRequest, Input},
    model::CloseCode,
    tracks::TrackHandle,
    Call, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{Arc, Weak};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{AudioPlayer, Transport, TransportStatus, VoiceDriver, EVENT_CAPACITY};
use crate::audio::state::{
    DisconnectReason, PlayerState, StateChange, TransportState, CLOSE_CODE_DISCONNECTED,
};
use crate::audio::track::AudioResource;
use crate::error::{PlaybackError, Result};

/// Pending `Songbird::remove` calls, so a new session never joins a call
/// that is still being torn down.
type Teardowns = Arc<DashMap<GuildId, JoinHandle<()>>>;

/// Maps songbird's disconnect cause onto ours. `None` means we asked to leave.
fn disconnect_cause(reason: Option<&VoiceDisconnectReason>) -> (DisconnectReason, Option<u16>) {
    match reason {
        None => (DisconnectReason::Manual, None),
        Some(VoiceDisconnectReason::WsClosed(code)) => {
            // Only a move or kick changes how a session reacts.
            let close_code = match code {
                Some(CloseCode::Disconnected) => Some(CLOSE_CODE_DISCONNECTED),
                _ => None,
            };
            (DisconnectReason::WebSocketClose, close_code)
        }
        Some(_) => (DisconnectReason::AdapterUnavailable, None),
    }
}

/// Global call handler feeding driver events into a transport's status.
struct ConnectionEvents {
    status: Arc<TransportStatus>,
}

#[async_trait]
impl VoiceEventHandler for ConnectionEvents {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        match ctx {
            EventContext::DriverConnect(_) | EventContext::DriverReconnect(_) => {
                self.status.set(TransportState::Ready);
            }
            EventContext::DriverDisconnect(data) => {
                let (reason, close_code) = disconnect_cause(data.reason.as_ref());
                self.status.set(TransportState::Disconnected { reason, close_code });
            }
            _ => {}
        }
        None
    }
}

/// Joins `channel_id`, moving to Connecting once the gateway accepted the request.
async fn join_channel(
    call: &Arc<tokio::sync::Mutex<Call>>,
    channel_id: ChannelId,
    status: &TransportStatus,
) -> std::result::Result<(), JoinError> {
    let join = call.lock().await.join(channel_id).await?;
    status.set_if(TransportState::Connecting, |state| {
        matches!(state, TransportState::Signalling)
    });
    join.await
}

pub struct SongbirdTransport {
    channel_id: ChannelId,
    status: Arc<TransportStatus>,
    manager: Arc<Songbird>,
    call: Arc<tokio::sync::Mutex<Call>>,
    teardowns: Teardowns,
    player: Mutex<Option<Arc<dyn AudioPlayer>>>,
}

impl Transport for SongbirdTransport {
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

        let call = self.call.clone();
        let status = self.status.clone();
        let channel_id = self.channel_id;
        tokio::spawn(async move {
            // A failed join leaves the state in Signalling; the ready wait takes it from there.
            if let Err(e) = join_channel(&call, channel_id, &status).await {
                warn!("⚠️ Rejoin in guild {} failed: {}", status.guild_id, e);
            }
        });
        true
    }

    fn destroy(&self) {
        self.player.lock().take();
        if !self.status.set(TransportState::Destroyed) {
            return;
        }

        let manager = self.manager.clone();
        let guild_id = self.guild_id();
        let teardown = tokio::spawn(async move {
            if let Err(e) = manager.remove(guild_id).await {
                debug!("Voice call for guild {} already gone: {}", guild_id, e);
            }
        });
        self.teardowns.insert(guild_id, teardown);
        info!("👋 Left voice in guild {}", guild_id);
    }

    fn subscribe(&self, player: Arc<dyn AudioPlayer>) {
        *self.player.lock() = Some(player);
    }
}

struct PlayerSlot {
    state: PlayerState,
    /// Bumped on every play/stop so late handles and events bow out.
    generation: u64,
    handle: Option<TrackHandle>,
}

struct PlayerInner {
    guild_id: GuildId,
    slot: Mutex<PlayerSlot>,
    events: broadcast::Sender<StateChange<PlayerState>>,
}

impl PlayerInner {
    fn transition(&self, slot: &mut PlayerSlot, new: PlayerState) {
        let old = std::mem::replace(&mut slot.state, new.clone());
        let _ = self.events.send(StateChange { old, new });
    }

    fn finish(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot.generation != generation || slot.state.is_idle() {
            return;
        }
        slot.generation += 1;
        slot.handle = None;
        self.transition(&mut slot, PlayerState::Idle);
    }

    /// Attaches the songbird track started for `generation`, or stops it if
    /// the player has moved on in the meantime.
    fn bind(self: &Arc<Self>, generation: u64, handle: TrackHandle) {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            let _ = handle.stop();
            return;
        }

        for event in [TrackEvent::End, TrackEvent::Error] {
            let ended = TrackEnded {
                inner: Arc::downgrade(self),
                generation,
            };
            if let Err(e) = handle.add_event(VoiceEvent::Track(event), ended) {
                error!("❌ Could not watch track in guild {}: {}", self.guild_id, e);
            }
        }
        if matches!(slot.state, PlayerState::Paused(_)) {
            let _ = handle.pause();
        }
        slot.handle = Some(handle);
    }
}

/// Track end or error: the player goes Idle, unless it already moved on.
struct TrackEnded {
    inner: Weak<PlayerInner>,
    generation: u64,
}

#[async_trait]
impl VoiceEventHandler for TrackEnded {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let inner = self.inner.upgrade()?;
        if let EventContext::Track(tracks) = ctx {
            for (state, _) in *tracks {
                debug!("Track in guild {} ended as {:?}", inner.guild_id, state.playing);
            }
        }
        inner.finish(self.generation);
        None
    }
}

pub struct SongbirdPlayer {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    inner: Arc<PlayerInner>,
}

impl SongbirdPlayer {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client, guild_id: GuildId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            manager,
            http,
            inner: Arc::new(PlayerInner {
                guild_id,
                slot: Mutex::new(PlayerSlot {
                    state: PlayerState::Idle,
                    generation: 0,
                    handle: None,
                }),
                events,
            }),
        }
    }
}

impl AudioPlayer for SongbirdPlayer {
    fn state(&self) -> PlayerState {
        self.inner.slot.lock().state.clone()
    }

    fn state_changes(&self) -> broadcast::Receiver<StateChange<PlayerState>> {
        self.inner.events.subscribe()
    }

    fn play(&self, resource: AudioResource) {
        let generation = {
            let mut slot = self.inner.slot.lock();
            slot.generation += 1;
            if let Some(previous) = slot.handle.take() {
                let _ = previous.stop();
            }
            self.inner
                .transition(&mut slot, PlayerState::Buffering(resource.metadata.clone()));
            slot.generation
        };

        let inner = self.inner.clone();
        let manager = self.manager.clone();
        let http = self.http.clone();
        tokio::spawn(async move {
            let Some(call) = manager.get(inner.guild_id) else {
                warn!("⚠️ No voice call in guild {} to play {}", inner.guild_id, resource.metadata.title);
                inner.finish(generation);
                return;
            };

            let input: Input = HttpRequest::new(http, resource.location).into();
            let handle = call.lock().await.play_input(input);
            {
                let mut slot = inner.slot.lock();
                if slot.generation == generation {
                    if let PlayerState::Buffering(track) = slot.state.clone() {
                        inner.transition(&mut slot, PlayerState::Playing(track));
                    }
                }
            }
            inner.bind(generation, handle);
        });
    }

    fn pause(&self) -> bool {
        let mut slot = self.inner.slot.lock();
        match slot.state.clone() {
            PlayerState::Playing(track) | PlayerState::Buffering(track) => {
                if let Some(handle) = &slot.handle {
                    let _ = handle.pause();
                }
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
                if let Some(handle) = &slot.handle {
                    let _ = handle.play();
                }
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
        if let Some(handle) = slot.handle.take() {
            let _ = handle.stop();
        }
        self.inner.transition(&mut slot, PlayerState::Idle);
        true
    }
}

/// Voice driver over a serenity-registered [`Songbird`] manager.
pub struct SongbirdDriver {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    teardowns: Teardowns,
}

impl SongbirdDriver {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client) -> Self {
        Self {
            manager,
            http,
            teardowns: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl VoiceDriver for SongbirdDriver {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Arc<dyn Transport>> {
        if let Some((_, teardown)) = self.teardowns.remove(&guild_id) {
            let _ = teardown.await;
        }

        let call = self.manager.get_or_insert(guild_id);
        let status = Arc::new(TransportStatus::new(guild_id));
        {
            let mut handler = call.lock().await;
            handler.remove_all_global_events();
            for event in [
                CoreEvent::DriverConnect,
                CoreEvent::DriverReconnect,
                CoreEvent::DriverDisconnect,
            ] {
                handler.add_global_event(
                    VoiceEvent::Core(event),
                    ConnectionEvents {
                        status: status.clone(),
                    },
                );
            }
        }

        if let Err(e) = join_channel(&call, channel_id, &status).await {
            error!("❌ Could not join channel {} in guild {}: {}", channel_id, guild_id, e);
            let _ = self.manager.remove(guild_id).await;
            return Err(PlaybackError::Transport(e.to_string()));
        }

        info!("🔊 Connected to voice channel {} in guild {}", channel_id, guild_id);
        Ok(Arc::new(SongbirdTransport {
            channel_id,
            status,
            manager: self.manager.clone(),
            call,
            teardowns: self.teardowns.clone(),
            player: Mutex::new(None),
        }))
    }

    fn create_player(&self, guild_id: GuildId) -> Arc<dyn AudioPlayer> {
        Arc::new(SongbirdPlayer::new(
            self.manager.clone(),
            self.http.clone(),
            guild_id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::Track;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    #[test]
    fn test_disconnect_causes() {
        assert_eq!(disconnect_cause(None), (DisconnectReason::Manual, None));
        assert_eq!(
            disconnect_cause(Some(&VoiceDisconnectReason::WsClosed(Some(CloseCode::Disconnected)))),
            (DisconnectReason::WebSocketClose, Some(CLOSE_CODE_DISCONNECTED))
        );
        assert_eq!(
            disconnect_cause(Some(&VoiceDisconnectReason::TimedOut)),
            (DisconnectReason::AdapterUnavailable, None)
        );
    }

    #[test]
    fn test_transport_status_ignores_late_connecting() {
        let status = TransportStatus::new(GuildId::new(1));
        assert!(status.set(TransportState::Ready));
        assert!(!status.set_if(TransportState::Connecting, |state| {
            matches!(state, TransportState::Signalling)
        }));
        assert!(status.get().is_ready());

        assert!(status.set(TransportState::Destroyed));
        assert!(!status.begin_rejoin());
        assert_eq!(status.rejoin_attempts(), 0);
    }

    #[tokio::test]
    async fn test_player_without_call_goes_idle() {
        let player = SongbirdPlayer::new(Songbird::serenity(), reqwest::Client::new(), GuildId::new(1));
        let mut changes = player.state_changes();

        let track = Track::new("a", UserId::new(1));
        player.play(AudioResource::new(track.clone(), "https://x.test/a.mp3"));
        assert_eq!(player.state(), PlayerState::Buffering(track));

        changes.recv().await.unwrap();
        let ended = changes.recv().await.unwrap();
        assert!(ended.new.is_idle());
        assert!(!player.stop(true));
    }

    #[tokio::test]
    async fn test_pause_before_stream_starts() {
        let player = SongbirdPlayer::new(Songbird::serenity(), reqwest::Client::new(), GuildId::new(1));
        let track = Track::new("a", UserId::new(1));
        player.play(AudioResource::new(track.clone(), "https://x.test/a.mp3"));

        assert!(player.pause());
        assert_eq!(player.state(), PlayerState::Paused(track.clone()));
        assert!(player.unpause());
        assert_eq!(player.state(), PlayerState::Playing(track));
        assert!(player.stop(true));
        assert!(player.state().is_idle());
    }
}
