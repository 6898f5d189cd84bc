//!
//! src/audio.rs
//!
//! The seam between the playback session and whatever decodes preview
//! media. A backend opens one handle per preview locator; the handle
//! reports timing updates and end-of-media on its own channel.
//!
//! ClockBackend is the shipped backend: it keeps time on the tokio clock
//! instead of driving an output device, which is also what lets tests run
//! the 30 second cap on a paused clock.
//!

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::config::PlaybackConfig;
use crate::errors::DeckError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEvent {
    TimeUpdate { position: Duration, duration: Option<Duration> },
    Ended
}

pub type AudioEvents = mpsc::UnboundedReceiver<AudioEvent>;

/// A live decoder/player bound to one preview locator
pub trait AudioHandle: Send {
    fn id(&self) -> Uuid;
    fn locator(&self) -> &str;
    fn play(&mut self) -> Result<(), DeckError>;
    fn pause(&mut self) -> Result<(), DeckError>;
    /// Stops and releases output; the handle is dropped right after
    fn stop(&mut self) -> Result<(), DeckError>;
    fn set_volume(&mut self, volume: f32);
}

pub trait AudioBackend: Send + Sync {
    fn open(&self, locator: &str) -> Result<(Box<dyn AudioHandle>, AudioEvents), DeckError>;
}

pub struct ClockBackend {
    media_length: Duration,
    tick: Duration,
    lengths: HashMap<String, Duration>,
    live: Arc<AtomicUsize>
}

impl ClockBackend {
    pub fn new(media_length: Duration, tick: Duration) -> Self {
        Self {
            media_length,
            tick: tick.max(Duration::from_millis(1)),
            lengths: HashMap::new(),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_config(cfg: &PlaybackConfig) -> Self {
        Self::new(cfg.simulated_media, cfg.time_update)
    }

    /// Overrides the media length for one locator
    pub fn with_length(mut self, locator: &str, length: Duration) -> Self {
        self.lengths.insert(locator.to_string(), length);
        self
    }

    /// Handles opened and not yet dropped
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl AudioBackend for ClockBackend {
    fn open(&self, locator: &str) -> Result<(Box<dyn AudioHandle>, AudioEvents), DeckError> {
        let url = url::Url::parse(locator)
            .map_err(|e| DeckError::Parse(format!("preview locator {locator}: {e}")))?;

        let length = self.lengths.get(locator).copied().unwrap_or(self.media_length);
        let (tx, rx) = mpsc::unbounded_channel();
        self.live.fetch_add(1, Ordering::SeqCst);

        let handle = ClockHandle {
            id: Uuid::new_v4(),
            locator: url.to_string(),
            length,
            tick: self.tick,
            tx,
            position: Duration::ZERO,
            ticker: None,
            volume: 1.0,
            live: self.live.clone(),
        };
        debug!(handle = %handle.id, locator, length_ms = length.as_millis() as u64, "audio.open");
        Ok((Box::new(handle), rx))
    }
}

struct Ticker {
    started: Instant,
    token: CancellationToken
}

struct ClockHandle {
    id: Uuid,
    locator: String,
    length: Duration,
    tick: Duration,
    tx: mpsc::UnboundedSender<AudioEvent>,
    position: Duration, // accumulated up to the last pause
    ticker: Option<Ticker>,
    volume: f32,
    live: Arc<AtomicUsize>
}

impl ClockHandle {
    fn halt(&mut self) -> Duration {
        match self.ticker.take() {
            Some(t) => {
                t.token.cancel();
                (self.position + t.started.elapsed()).min(self.length)
            }
            None => self.position,
        }
    }
}

impl AudioHandle for ClockHandle {
    fn id(&self) -> Uuid {
        self.id
    }

    fn locator(&self) -> &str {
        &self.locator
    }

    fn play(&mut self) -> Result<(), DeckError> {
        if self.ticker.is_some() {
            return Ok(());
        }
        if self.tx.is_closed() {
            return Err(DeckError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "audio event receiver dropped"
            )));
        }

        let token = CancellationToken::new();
        let started = Instant::now();
        let (base, length, tick) = (self.position, self.length, self.tick);
        let (tx, stop) = (self.tx.clone(), token.clone());

        tokio::spawn(async move {
            loop {
                let position = base + started.elapsed();
                if position >= length {
                    let _ = tx.send(AudioEvent::TimeUpdate { position: length, duration: Some(length) });
                    let _ = tx.send(AudioEvent::Ended);
                    break;
                }
                let _ = tx.send(AudioEvent::TimeUpdate { position, duration: Some(length) });
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = sleep(tick.min(length - position)) => {}
                }
            }
        });

        self.ticker = Some(Ticker { started, token });
        debug!(handle = %self.id, volume = self.volume, "audio.play");
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DeckError> {
        self.position = self.halt();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeckError> {
        self.halt();
        self.position = Duration::ZERO;
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.halt();
        self.live.fetch_sub(1, Ordering::SeqCst);
        debug!(handle = %self.id, "audio.release");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clock_handle_reports_updates_then_end() {
        let backend = ClockBackend::new(Duration::from_secs(1), Duration::from_millis(250));
        let (mut handle, mut events) = backend.open("https://p.scdn.co/mp3-preview/a").unwrap();
        handle.play().unwrap();

        let mut updates = 0;
        loop {
            match events.recv().await.unwrap() {
                AudioEvent::TimeUpdate { position, duration } => {
                    assert!(position <= Duration::from_secs(1));
                    assert_eq!(duration, Some(Duration::from_secs(1)));
                    updates += 1;
                }
                AudioEvent::Ended => break,
            }
        }
        assert!(updates >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_handle_stops_reporting() {
        let backend = ClockBackend::new(Duration::from_secs(10), Duration::from_millis(250));
        let (mut handle, mut events) = backend.open("https://p.scdn.co/mp3-preview/a").unwrap();
        handle.play().unwrap();
        sleep(Duration::from_millis(600)).await;
        handle.pause().unwrap();

        while events.try_recv().is_ok() {}
        sleep(Duration::from_secs(5)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn live_count_follows_drops() {
        let backend = ClockBackend::new(Duration::from_secs(30), Duration::from_millis(250));
        let (a, _ea) = backend.open("https://p.scdn.co/mp3-preview/a").unwrap();
        let (b, _eb) = backend.open("https://p.scdn.co/mp3-preview/b").unwrap();
        assert_eq!(backend.live_handles(), 2);
        drop(a);
        assert_eq!(backend.live_handles(), 1);
        drop(b);
        assert_eq!(backend.live_handles(), 0);
    }

    #[test]
    fn bad_locator_is_rejected() {
        let backend = ClockBackend::new(Duration::from_secs(30), Duration::from_millis(250));
        assert!(matches!(backend.open("not a url"), Err(DeckError::Parse(_))));
        assert_eq!(backend.live_handles(), 0);
    }
}
