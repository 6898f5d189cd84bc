//!
//! src/session.rs
//!
//! Owns the single "now playing" slot. Starting a track tears the previous
//! audio handle down first, arms the preview cap and spawns a watcher that
//! races the cap against end-of-media; whichever completes first performs
//! the transition and the other is dropped with the watcher.
//!
//! Play history is mutated and persisted here, before any playback is
//! attempted, so it records what the user asked for rather than what played.
//!

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{AudioBackend, AudioEvent, AudioEvents, AudioHandle};
use crate::config::{FallbackPolicy, PlaybackConfig};
use crate::errors::DeckError;
use crate::history::PlayHistory;
use crate::types::{Track, TrackId, TrackSort};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    LoadedPaused,
    Playing,
    Ended
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(PlaybackState),
    TrackChanged(Option<TrackId>),
    HistoryChanged(usize),
    CapReached(TrackId),
    Ended(TrackId)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    Playing(TrackId),
    Substituted { requested: TrackId, playing: TrackId }
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: PlaybackState,
    pub current: Option<Track>,
    pub playing: bool,
    pub elapsed_fraction: f64
}

const EVENT_CAPACITY: usize = 64;

struct Slot {
    state: PlaybackState,
    current: Option<Track>,
    handle: Option<Box<dyn AudioHandle>>,
    generation: u64,
    watcher: Option<CancellationToken>
}

impl Slot {
    /// Unconditional: a failed stop is logged and the handle dropped anyway
    fn teardown(&mut self) {
        if let Some(token) = self.watcher.take() {
            token.cancel();
        }
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.stop() {
                warn!(handle = %handle.id(), error = %e, "session.handle.stop_failed");
            }
            debug!(handle = %handle.id(), "session.handle.released");
        }
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// elapsed / min(reported duration, cap), in [0, 1]
pub fn elapsed_fraction(position: Duration, duration: Option<Duration>, cap: Duration) -> f64 {
    let denom = match duration {
        Some(d) if !d.is_zero() => d.min(cap),
        _ => cap,
    };
    if denom.is_zero() {
        return 0.0;
    }
    (position.as_secs_f64() / denom.as_secs_f64()).clamp(0.0, 1.0)
}

pub struct SessionManager<B: AudioBackend> {
    backend: B,
    cfg: PlaybackConfig,
    history: PlayHistory,
    fallback_pool: Vec<Track>,
    slot: Arc<Mutex<Slot>>,
    progress: Arc<watch::Sender<f64>>,
    events: broadcast::Sender<SessionEvent>
}

impl<B: AudioBackend> SessionManager<B> {
    pub fn new(backend: B, cfg: PlaybackConfig, history: PlayHistory) -> Self {
        let (progress, _) = watch::channel(0.0);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            cfg,
            history,
            fallback_pool: Vec::new(),
            slot: Arc::new(Mutex::new(Slot {
                state: PlaybackState::Idle,
                current: None,
                handle: None,
                generation: 0,
                watcher: None,
            })),
            progress: Arc::new(progress),
            events,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn history(&self) -> &PlayHistory {
        &self.history
    }

    pub fn sorted_history(&self, sort: TrackSort) -> Vec<&Track> {
        self.history.sorted(sort)
    }

    /// Candidates for substitution when the fallback policy allows it
    pub fn set_fallback_pool(&mut self, tracks: Vec<Track>) {
        self.fallback_pool = tracks;
    }

    /// Continuously updated elapsed fraction
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let slot = lock(&self.slot);
        SessionSnapshot {
            state: slot.state,
            current: slot.current.clone(),
            playing: slot.state == PlaybackState::Playing,
            elapsed_fraction: *self.progress.borrow(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub async fn request_play(&mut self, track: &Track) -> Result<PlayOutcome, DeckError> {
        if self.history.add(track).await {
            info!(track = %track.id, name = %track.name, "session.history.added");
            self.emit(SessionEvent::HistoryChanged(self.history.len()));
        }

        if track.has_preview() {
            return self.start(track).map(|()| PlayOutcome::Playing(track.id.clone()));
        }

        if self.cfg.fallback == FallbackPolicy::CatalogTopTracks {
            let substitute = self.fallback_pool
                .iter()
                .find(|t| t.has_preview() && t.id != track.id)
                .cloned();
            if let Some(sub) = substitute {
                match self.start(&sub) {
                    Ok(()) => {
                        info!(requested = %track.id, playing = %sub.id, "session.fallback.substituted");
                        return Ok(PlayOutcome::Substituted {
                            requested: track.id.clone(),
                            playing: sub.id,
                        });
                    }
                    Err(e) => warn!(playing = %sub.id, error = %e, "session.fallback.failed"),
                }
            }
        }

        warn!(track = %track.id, name = %track.name, "session.no_preview");
        self.load_paused(track);
        Err(DeckError::NoPreview(track.name.clone()))
    }

    /// Selects a track for display without sounding it
    fn load_paused(&self, track: &Track) {
        {
            let mut slot = lock(&self.slot);
            slot.teardown();
            slot.generation += 1;
            slot.current = Some(track.clone());
            slot.state = PlaybackState::LoadedPaused;
        }
        self.progress.send_replace(0.0);
        self.emit(SessionEvent::TrackChanged(Some(track.id.clone())));
        self.emit(SessionEvent::StateChanged(PlaybackState::LoadedPaused));
    }

    fn start(&self, track: &Track) -> Result<(), DeckError> {
        let locator = track.preview_url
            .as_deref()
            .ok_or_else(|| DeckError::NoPreview(track.name.clone()))?;

        let mut slot = lock(&self.slot);
        slot.teardown();
        slot.generation += 1;
        slot.current = Some(track.clone());
        slot.state = PlaybackState::LoadedPaused;
        self.progress.send_replace(0.0);
        self.emit(SessionEvent::TrackChanged(Some(track.id.clone())));

        let (mut handle, events) = match self.backend.open(locator) {
            Ok(opened) => opened,
            Err(e) => {
                warn!(track = %track.id, error = %e, "session.open_failed");
                self.emit(SessionEvent::StateChanged(PlaybackState::LoadedPaused));
                return Err(e);
            }
        };
        handle.set_volume(self.cfg.volume);
        if let Err(e) = handle.play() {
            warn!(track = %track.id, error = %e, "session.play_failed");
            drop(handle);
            self.emit(SessionEvent::StateChanged(PlaybackState::LoadedPaused));
            return Err(e);
        }

        // the cap counts from the moment the handle starts playing
        let deadline = Instant::now() + self.cfg.preview_cap;
        let token = CancellationToken::new();
        let watcher = Watcher {
            slot: self.slot.clone(),
            generation: slot.generation,
            track: track.id.clone(),
            cap: self.cfg.preview_cap,
            deadline,
            progress: self.progress.clone(),
            events_tx: self.events.clone(),
            token: token.clone(),
        };

        info!(track = %track.id, handle = %handle.id(), locator = handle.locator(), "session.playing");
        slot.handle = Some(handle);
        slot.watcher = Some(token);
        slot.state = PlaybackState::Playing;
        drop(slot);

        self.emit(SessionEvent::StateChanged(PlaybackState::Playing));
        tokio::spawn(watcher.run(events));
        Ok(())
    }

    /// No-op unless playing
    pub fn pause(&self) {
        let mut slot = lock(&self.slot);
        if slot.state != PlaybackState::Playing {
            return;
        }
        if let Some(token) = slot.watcher.take() {
            token.cancel();
        }
        if let Some(handle) = slot.handle.as_mut() {
            if let Err(e) = handle.pause() {
                warn!(handle = %handle.id(), error = %e, "session.pause_failed");
            }
        }
        slot.state = PlaybackState::LoadedPaused;
        drop(slot);
        debug!("session.paused");
        self.emit(SessionEvent::StateChanged(PlaybackState::LoadedPaused));
    }

    /// Restarts the loaded track from the top
    pub async fn resume(&mut self) -> Result<PlayOutcome, DeckError> {
        let current = lock(&self.slot).current.clone();
        match current {
            Some(track) if track.has_preview() => self.request_play(&track).await,
            Some(track) => Err(DeckError::NoPreview(track.name)),
            None => Err(DeckError::NoPreview("no track loaded".to_string())),
        }
    }

    pub async fn remove_from_history(&mut self, id: &TrackId) -> bool {
        let removed = self.history.remove(id).await;
        if removed {
            self.emit(SessionEvent::HistoryChanged(self.history.len()));
        }
        removed
    }

    pub async fn clear_history(&mut self) {
        self.history.clear().await;
        self.emit(SessionEvent::HistoryChanged(0));
    }

    /// Releases the audio handle and empties the slot
    pub fn shutdown(&self) {
        let mut slot = lock(&self.slot);
        slot.teardown();
        slot.generation += 1;
        slot.current = None;
        slot.state = PlaybackState::Idle;
        drop(slot);
        self.progress.send_replace(0.0);
    }
}

/// Races the cap timer against the handle's end-of-media for one generation
struct Watcher {
    slot: Arc<Mutex<Slot>>,
    generation: u64,
    track: TrackId,
    cap: Duration,
    deadline: Instant,
    progress: Arc<watch::Sender<f64>>,
    events_tx: broadcast::Sender<SessionEvent>,
    token: CancellationToken
}

impl Watcher {
    async fn run(self, mut events: AudioEvents) {
        let cap = sleep_until(self.deadline);
        tokio::pin!(cap);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                _ = &mut cap => {
                    self.on_cap();
                    return;
                }
                ev = events.recv() => match ev {
                    Some(AudioEvent::TimeUpdate { position, duration }) => {
                        if self.token.is_cancelled() {
                            return;
                        }
                        self.progress.send_replace(elapsed_fraction(position, duration, self.cap));
                    }
                    Some(AudioEvent::Ended) => {
                        self.on_ended();
                        return;
                    }
                    None => return,
                }
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn on_cap(&self) {
        let mut slot = lock(&self.slot);
        if slot.generation != self.generation || slot.state != PlaybackState::Playing {
            return;
        }
        if let Some(handle) = slot.handle.as_mut() {
            if let Err(e) = handle.pause() {
                warn!(handle = %handle.id(), error = %e, "session.cap.pause_failed");
            }
        }
        slot.watcher = None;
        slot.state = PlaybackState::LoadedPaused;
        drop(slot);

        self.progress.send_replace(0.0);
        info!(track = %self.track, cap_ms = self.cap.as_millis() as u64, "session.cap.reached");
        self.emit(SessionEvent::CapReached(self.track.clone()));
        self.emit(SessionEvent::StateChanged(PlaybackState::LoadedPaused));
    }

    fn on_ended(&self) {
        let mut slot = lock(&self.slot);
        if slot.generation != self.generation {
            return;
        }
        slot.watcher = None;
        slot.handle = None;
        slot.current = None;
        slot.state = PlaybackState::Idle;
        drop(slot);

        self.progress.send_replace(0.0);
        info!(track = %self.track, "session.ended");
        self.emit(SessionEvent::Ended(self.track.clone()));
        self.emit(SessionEvent::StateChanged(PlaybackState::Ended));
        self.emit(SessionEvent::TrackChanged(None));
        self.emit(SessionEvent::StateChanged(PlaybackState::Idle));
    }
}
