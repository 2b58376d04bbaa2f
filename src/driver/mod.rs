//! # Voice Driver Module
//!
//! Narrow contracts for the voice side of a playback session. A session only
//! issues commands against these traits and observes their state streams;
//! join signalling, encryption and audio encoding live behind them.
//!
//! - [`Transport`]: one voice connection for a guild
//! - [`AudioPlayer`]: one active audio resource at a time
//! - [`VoiceDriver`]: joins channels and creates players
//!
//! [`songbird`] drives real Discord voice connections. [`loopback`] is an
//! in-process driver used by the console binary and tests.

pub mod loopback;
pub mod songbird;

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::audio::state::{PlayerState, StateChange, TransportState};
use crate::audio::track::AudioResource;
use crate::error::Result;

pub use loopback::{LoopbackDriver, LoopbackPlayer, LoopbackTransport};
pub use self::songbird::{SongbirdDriver, SongbirdPlayer, SongbirdTransport};

const EVENT_CAPACITY: usize = 64;

/// A live voice connection.
///
/// `destroy` must be idempotent: a session may call it again while reacting to
/// the `Destroyed` state it caused.
pub trait Transport: Send + Sync {
    fn guild_id(&self) -> GuildId;

    fn state(&self) -> TransportState;

    /// Every transition from the moment of subscribing.
    fn state_changes(&self) -> broadcast::Receiver<StateChange<TransportState>>;

    /// Rejoins since the last Ready.
    fn rejoin_attempts(&self) -> u32;

    /// Starts a rejoin; false if the connection is already destroyed.
    fn rejoin(&self) -> bool;

    fn destroy(&self);

    /// Routes the player's output through this connection.
    fn subscribe(&self, player: Arc<dyn AudioPlayer>);
}

pub trait AudioPlayer: Send + Sync {
    fn state(&self) -> PlayerState;

    fn state_changes(&self) -> broadcast::Receiver<StateChange<PlayerState>>;

    /// Binds `resource`, replacing whatever was bound.
    fn play(&self, resource: AudioResource);

    fn pause(&self) -> bool;

    fn unpause(&self) -> bool;

    /// Ends the bound resource; the player then reports Idle. False if already idle.
    fn stop(&self, force: bool) -> bool;
}

#[async_trait]
pub trait VoiceDriver: Send + Sync {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Arc<dyn Transport>>;

    /// A player whose output goes to `guild_id`'s connection once subscribed.
    fn create_player(&self, guild_id: GuildId) -> Arc<dyn AudioPlayer>;
}

/// Connection state, rejoin counter and change feed behind a [`Transport`].
struct TransportStatus {
    guild_id: GuildId,
    state: Mutex<TransportState>,
    rejoin_attempts: AtomicU32,
    events: broadcast::Sender<StateChange<TransportState>>,
}

impl TransportStatus {
    fn new(guild_id: GuildId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            guild_id,
            state: Mutex::new(TransportState::Signalling),
            rejoin_attempts: AtomicU32::new(0),
            events,
        }
    }

    fn get(&self) -> TransportState {
        self.state.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChange<TransportState>> {
        self.events.subscribe()
    }

    fn rejoin_attempts(&self) -> u32 {
        self.rejoin_attempts.load(Ordering::SeqCst)
    }

    /// Moves to `new` and broadcasts the change. Destroyed is final.
    fn set(&self, new: TransportState) -> bool {
        self.set_if(new, |_| true)
    }

    /// Like [`set`](Self::set), but only from a state `from` accepts.
    fn set_if<F>(&self, new: TransportState, from: F) -> bool
    where
        F: FnOnce(&TransportState) -> bool,
    {
        let old = {
            let mut state = self.state.lock();
            if state.is_destroyed() || !from(&*state) {
                return false;
            }
            std::mem::replace(&mut *state, new.clone())
        };

        if new.is_ready() {
            self.rejoin_attempts.store(0, Ordering::SeqCst);
        }

        debug!("🔌 Transport {}: {:?} -> {:?}", self.guild_id, old, new);
        let _ = self.events.send(StateChange { old, new });
        true
    }

    /// Counts a rejoin and goes back to Signalling; false once destroyed.
    fn begin_rejoin(&self) -> bool {
        if self.state.lock().is_destroyed() {
            return false;
        }
        self.rejoin_attempts.fetch_add(1, Ordering::SeqCst);
        self.set(TransportState::Signalling)
    }
}

/// Waits until the transport reports a state accepted by `accept`.
///
/// The current state counts. Returns `None` on timeout or when the state
/// stream closes.
pub async fn await_transport_state<F>(
    transport: &dyn Transport,
    within: Duration,
    mut accept: F,
) -> Option<TransportState>
where
    F: FnMut(&TransportState) -> bool,
{
    let mut changes = transport.state_changes();
    let current = transport.state();
    if accept(&current) {
        return Some(current);
    }

    let wait = async {
        loop {
            match changes.recv().await {
                Ok(change) if accept(&change.new) => return Some(change.new),
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => {
                    let current = transport.state();
                    if accept(&current) {
                        return Some(current);
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    };

    tokio::time::timeout(within, wait).await.ok().flatten()
}
