use parking_lot::Mutex;
use serde::Serialize;
use serenity::model::id::GuildId;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    queue::{MusicQueue, QueuePage, Selection},
    state::{
        player_transition, transport_transition, PlayerAction, PlayerState, StateChange,
        TransportAction, TransportState,
    },
    track::Track,
};
use crate::{
    config::PlaybackConfig,
    driver::{await_transport_state, AudioPlayer, Transport},
    error::{PlaybackError, Result},
    sources::StreamResolver,
};

/// Snapshot of a subscription for status and queue commands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackStatus {
    pub current_track: Option<Track>,
    pub queue: Vec<Track>,
    pub shuffle: bool,
    pub loop_single: bool,
    pub loop_all: bool,
    pub queued_duration: Duration,
}

/// Non-blocking advance guard: whoever fails to take it walks away.
struct AdvanceGuard<'a>(&'a AtomicBool);

impl<'a> AdvanceGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for AdvanceGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One guild's playback session.
///
/// Owns the queue and the exclusive handles to the voice connection and the
/// audio player. Two background tasks watch their state streams: transport
/// changes drive reconnect supervision, a player going idle advances the
/// queue. Both stop once the transport is destroyed.
pub struct PlaybackSubscription {
    guild_id: GuildId,
    transport: Arc<dyn Transport>,
    player: Arc<dyn AudioPlayer>,
    resolver: Arc<dyn StreamResolver>,
    config: PlaybackConfig,
    queue: Mutex<MusicQueue>,
    queue_lock: AtomicBool,
    ready_lock: AtomicBool,
    skip_requested: AtomicBool,
    stopped: AtomicBool,
    lost: Mutex<Option<PlaybackError>>,
    shutdown: CancellationToken,
}

impl PlaybackSubscription {
    /// Binds the player to the transport and starts watching both.
    pub fn start(
        transport: Arc<dyn Transport>,
        player: Arc<dyn AudioPlayer>,
        resolver: Arc<dyn StreamResolver>,
        config: PlaybackConfig,
    ) -> Arc<Self> {
        let subscription = Arc::new(Self {
            guild_id: transport.guild_id(),
            queue: Mutex::new(MusicQueue::new(config.max_queue_size)),
            transport,
            player,
            resolver,
            config,
            queue_lock: AtomicBool::new(false),
            ready_lock: AtomicBool::new(false),
            skip_requested: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            lost: Mutex::new(None),
            shutdown: CancellationToken::new(),
        });

        subscription.transport.subscribe(subscription.player.clone());
        subscription.clone().watch_transport();
        subscription.clone().watch_player();

        info!("🎧 Playback subscription started in guild {}", subscription.guild_id);
        subscription
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// The track bound to the player, if any.
    pub fn current_track(&self) -> Option<Track> {
        self.player.state().track().cloned()
    }

    pub fn last_track(&self) -> Option<Track> {
        self.queue.lock().last_track().cloned()
    }

    pub fn queue(&self) -> Vec<Track> {
        self.queue.lock().tracks()
    }

    pub fn queue_page(&self, page: usize, items_per_page: usize) -> QueuePage {
        self.queue.lock().page(page, items_per_page)
    }

    pub fn status(&self) -> PlaybackStatus {
        let current_track = self.current_track();
        let queue = self.queue.lock();
        PlaybackStatus {
            current_track,
            queue: queue.tracks(),
            shuffle: queue.shuffle(),
            loop_single: queue.loop_single(),
            loop_all: queue.loop_all(),
            queued_duration: queue.total_duration(),
        }
    }

    pub fn is_advancing(&self) -> bool {
        self.queue_lock.load(Ordering::Acquire)
    }

    /// True once the transport is destroyed; such a subscription never plays again.
    pub fn is_defunct(&self) -> bool {
        self.shutdown.is_cancelled() || self.transport.state().is_destroyed()
    }

    /// The `ConnectionLost` error that ended this session, if one did.
    pub fn connection_lost(&self) -> Option<PlaybackError> {
        self.lost.lock().clone()
    }

    pub async fn enqueue(&self, track: Track) -> Result<()> {
        let title = track.title.clone();
        self.queue.lock().push(track)?;
        self.process_queue().await;
        info!("✅ Queued {} in guild {}", title, self.guild_id);
        Ok(())
    }

    /// Queues as many tracks as fit, then advances once.
    pub async fn enqueue_many(&self, tracks: Vec<Track>) -> Vec<Track> {
        let accepted = self.queue.lock().extend(tracks);
        self.process_queue().await;
        accepted
    }

    /// Stops the current track; the idle transition advances the queue.
    pub fn skip_current(&self) -> Option<Track> {
        let current = self.current_track()?;
        self.skip_requested.store(true, Ordering::Release);
        if !self.player.stop(false) {
            self.skip_requested.store(false, Ordering::Release);
            return None;
        }
        info!("⏭️ Skipped {} in guild {}", current.title, self.guild_id);
        Some(current)
    }

    /// Removes the queued track at a 1-based position.
    pub fn skip_at(&self, position: usize) -> Result<Track> {
        let track = self.queue.lock().remove_at(position)?;
        info!("⏭️ Removed #{} {} in guild {}", position, track.title, self.guild_id);
        Ok(track)
    }

    /// Clears the queue and force-stops the player. Nothing plays afterwards.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.queue.lock().clear();
        self.player.stop(true);
        info!("⏹️ Stopping playback in guild {}", self.guild_id);
        self.leave_if_idle();
    }

    pub fn pause(&self) -> bool {
        self.player.pause()
    }

    pub fn resume(&self) -> bool {
        self.player.unpause()
    }

    pub fn toggle_shuffle(&self) -> bool {
        let shuffle = self.queue.lock().toggle_shuffle();
        info!("🔀 Shuffle in guild {} set to {}", self.guild_id, shuffle);
        shuffle
    }

    pub fn toggle_loop_single(&self) -> bool {
        let loop_single = self.queue.lock().toggle_loop_single();
        info!("🔂 Track loop in guild {} set to {}", self.guild_id, loop_single);
        loop_single
    }

    pub fn toggle_loop_all(&self) -> bool {
        let loop_all = self.queue.lock().toggle_loop_all();
        info!("🔁 Queue loop in guild {} set to {}", self.guild_id, loop_all);
        loop_all
    }

    /// Starts the next track if the player is idle and nobody else is advancing.
    ///
    /// A track that fails to resolve is dropped and the next one tried. A
    /// looped track gets `max_resolution_retries` attempts before it is
    /// forgotten and the queue takes over.
    pub async fn process_queue(&self) {
        let mut replay_failures = 0;

        loop {
            if !self.can_advance() {
                return;
            }
            let Some(guard) = AdvanceGuard::try_acquire(&self.queue_lock) else {
                debug!("Queue already advancing in guild {}", self.guild_id);
                return;
            };
            // Another advance may have started a track since the first check.
            if !self.can_advance() {
                return;
            }
            let Some(Selection { track, replay }) = self.queue.lock().select_next() else {
                return;
            };

            match self.resolver.resolve(&track).await {
                Ok(resource) => {
                    if self.stopped.load(Ordering::Acquire) {
                        debug!("Discarding {} resolved after stop", track.title);
                        drop(guard);
                        self.leave_if_idle();
                        return;
                    }
                    self.player.play(resource);
                    drop(guard);
                    info!("🎵 Started playing {} in guild {}", track.title, self.guild_id);
                    return;
                }
                Err(e) => {
                    warn!("❌ Could not play {} in guild {}: {}", track.title, self.guild_id, e);
                    if replay {
                        replay_failures += 1;
                        if replay_failures >= self.config.max_resolution_retries {
                            warn!(
                                "🔂 Looped track {} failed {} times, skipping it",
                                track.title, replay_failures
                            );
                            self.queue.lock().forget_last_track();
                            replay_failures = 0;
                        }
                    }
                }
            }
        }
    }

    fn can_advance(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && self.player.state().is_idle()
    }

    /// Destroys the connection when nothing is playing or about to play.
    fn leave_if_idle(&self) {
        let Some(_guard) = AdvanceGuard::try_acquire(&self.queue_lock) else {
            return;
        };
        if self.player.state().is_idle() {
            info!("👋 Nothing left to play in guild {}, leaving", self.guild_id);
            self.transport.destroy();
        }
    }

    async fn on_player_change(&self, change: StateChange<PlayerState>) {
        let PlayerAction::Advance { finished } = player_transition(&change) else {
            return;
        };

        let skipped = self.skip_requested.swap(false, Ordering::AcqRel);
        if let Some(track) = finished {
            if !skipped && !self.stopped.load(Ordering::Acquire) {
                self.queue.lock().requeue_finished(track);
            }
        }

        self.process_queue().await;
        self.leave_if_idle();
    }

    /// Dropped player events may have hidden an Idle transition.
    async fn on_player_lagged(&self, skipped: u64) {
        warn!("Player events lagged by {} in guild {}", skipped, self.guild_id);
        if self.player.state().is_idle() {
            self.process_queue().await;
            self.leave_if_idle();
        }
    }

    fn on_transport_state(self: &Arc<Self>, state: TransportState) {
        let action = transport_transition(
            &state,
            self.transport.rejoin_attempts(),
            self.ready_lock.load(Ordering::Acquire),
            &self.config,
        );

        match action {
            TransportAction::AwaitRecovery { grace } => {
                debug!("Voice socket closed in guild {}, waiting {:?} for recovery", self.guild_id, grace);
                let subscription = self.clone();
                tokio::spawn(async move { subscription.await_recovery(grace).await });
            }
            TransportAction::Rejoin { delay, attempt } => {
                let subscription = self.clone();
                tokio::spawn(async move { subscription.rejoin_after(delay, attempt).await });
            }
            TransportAction::GiveUp { attempts } => {
                self.report_lost(format!("gave up after {} rejoin attempts", attempts));
                self.transport.destroy();
            }
            TransportAction::Shutdown => {
                self.stop();
                self.shutdown.cancel();
                info!("🔌 Voice connection destroyed in guild {}", self.guild_id);
            }
            TransportAction::AwaitReady { timeout } => {
                self.ready_lock.store(true, Ordering::Release);
                let subscription = self.clone();
                tokio::spawn(async move { subscription.await_ready(timeout).await });
            }
            TransportAction::Nothing => {}
        }
    }

    async fn await_recovery(&self, grace: Duration) {
        let recovered = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            state = await_transport_state(self.transport.as_ref(), grace, |s| {
                matches!(s, TransportState::Connecting | TransportState::Destroyed)
            }) => state,
        };

        match recovered {
            Some(TransportState::Connecting) => info!("🔄 Voice connection in guild {} is moving", self.guild_id),
            Some(_) => {}
            None => {
                self.report_lost("removed from the voice channel".to_string());
                self.transport.destroy();
            }
        }
    }

    async fn rejoin_after(&self, delay: Duration, attempt: u32) {
        info!(
            "🔄 Rejoining voice in guild {} in {} (attempt {}/{})",
            self.guild_id,
            humantime::format_duration(delay),
            attempt,
            self.config.max_rejoin_attempts
        );
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                if !self.transport.rejoin() {
                    debug!("Rejoin skipped, connection in guild {} already gone", self.guild_id);
                }
            }
        }
    }

    /// Waits for Ready. A disconnect hands control back to the rejoin logic.
    async fn await_ready(&self, timeout: Duration) {
        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            state = await_transport_state(self.transport.as_ref(), timeout, |s| {
                s.is_ready() || s.is_disconnected() || s.is_destroyed()
            }) => Some(state),
        };
        self.ready_lock.store(false, Ordering::Release);

        match outcome {
            Some(None) => {
                if !self.transport.state().is_destroyed() {
                    self.report_lost(format!(
                        "not ready after {}",
                        humantime::format_duration(timeout)
                    ));
                    self.transport.destroy();
                }
            }
            Some(Some(state)) => debug!("Ready wait in guild {} ended in {:?}", self.guild_id, state),
            None => {}
        }
    }

    /// Records the terminal failure. Only the first report is kept and logged.
    fn report_lost(&self, reason: String) {
        let mut lost = self.lost.lock();
        if lost.is_some() {
            debug!("Connection in guild {} already reported lost ({})", self.guild_id, reason);
            return;
        }
        let err = PlaybackError::ConnectionLost {
            guild_id: self.guild_id,
            reason,
        };
        error!("❌ {}", err);
        *lost = Some(err);
    }

    fn watch_transport(self: Arc<Self>) {
        let mut changes = self.transport.state_changes();
        let initial = self.transport.state();

        tokio::spawn(async move {
            self.on_transport_state(initial);
            loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(change) => self.on_transport_state(change.new),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Transport events lagged by {} in guild {}", skipped, self.guild_id);
                            let current = self.transport.state();
                            self.on_transport_state(current);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Transport watcher for guild {} stopped", self.guild_id);
        });
    }

    fn watch_player(self: Arc<Self>) {
        let mut changes = self.player.state_changes();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(change) => self.on_player_change(change).await,
                        Err(RecvError::Lagged(skipped)) => self.on_player_lagged(skipped).await,
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Player watcher for guild {} stopped", self.guild_id);
        });
    }
}
