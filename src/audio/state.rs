//! Connection and player states, plus the pure transition rules a
//! [`PlaybackSubscription`](super::subscription::PlaybackSubscription) executes.
//!
//! `transport_transition` and `player_transition` never touch a collaborator;
//! they map an observed state to an action and the subscription carries it out.

use std::time::Duration;

use super::track::Track;
use crate::config::PlaybackConfig;

/// WebSocket close code sent when the bot is moved between channels or kicked.
pub const CLOSE_CODE_DISCONNECTED: u16 = 4014;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The voice signalling socket closed; see `close_code`.
    WebSocketClose,
    AdapterUnavailable,
    EndpointRemoved,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Signalling,
    Connecting,
    Ready,
    Disconnected {
        reason: DisconnectReason,
        close_code: Option<u16>,
    },
    Destroyed,
}

impl TransportState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }

    /// Moved or kicked: the connection may recover on its own.
    pub fn is_channel_move(&self) -> bool {
        matches!(
            self,
            Self::Disconnected {
                reason: DisconnectReason::WebSocketClose,
                close_code: Some(CLOSE_CODE_DISCONNECTED),
            }
        )
    }
}

/// Player status; every non-idle state carries the bound resource's track.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerState {
    Idle,
    Buffering(Track),
    Playing(Track),
    Paused(Track),
}

impl PlayerState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn track(&self) -> Option<&Track> {
        match self {
            Self::Idle => None,
            Self::Buffering(track) | Self::Playing(track) | Self::Paused(track) => Some(track),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateChange<S> {
    pub old: S,
    pub new: S,
}

/// What the subscription does in response to a transport state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    /// Wait `grace` for Connecting, then destroy.
    AwaitRecovery { grace: Duration },
    /// Sleep `delay` and call `rejoin()`.
    Rejoin { delay: Duration, attempt: u32 },
    /// Rejoin budget spent: destroy and report the connection as lost.
    GiveUp { attempts: u32 },
    /// Transport destroyed: stop the subscription for good.
    Shutdown,
    /// Wait `timeout` for Ready, then destroy.
    AwaitReady { timeout: Duration },
    Nothing,
}

/// What the subscription does in response to a player state change.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerAction {
    /// A resource ended; `finished` is the track it carried.
    Advance { finished: Option<Track> },
    Nothing,
}

pub fn transport_transition(
    state: &TransportState,
    rejoin_attempts: u32,
    awaiting_ready: bool,
    config: &PlaybackConfig,
) -> TransportAction {
    match state {
        TransportState::Disconnected { .. } if state.is_channel_move() => {
            TransportAction::AwaitRecovery {
                grace: config.reconnect_grace,
            }
        }
        TransportState::Disconnected { .. } if rejoin_attempts < config.max_rejoin_attempts => {
            TransportAction::Rejoin {
                delay: config.rejoin_delay(rejoin_attempts),
                attempt: rejoin_attempts + 1,
            }
        }
        TransportState::Disconnected { .. } => TransportAction::GiveUp {
            attempts: rejoin_attempts,
        },
        TransportState::Destroyed => TransportAction::Shutdown,
        TransportState::Signalling | TransportState::Connecting if !awaiting_ready => {
            TransportAction::AwaitReady {
                timeout: config.ready_timeout,
            }
        }
        _ => TransportAction::Nothing,
    }
}

pub fn player_transition(change: &StateChange<PlayerState>) -> PlayerAction {
    if change.new.is_idle() && !change.old.is_idle() {
        PlayerAction::Advance {
            finished: change.old.track().cloned(),
        }
    } else {
        PlayerAction::Nothing
    }
}
