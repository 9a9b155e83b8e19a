//! Audio playback position and the events that end playback.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::store::AnimationStateStore;

/// Source of the current audio playback position.
pub trait PlaybackClock {
    fn position_secs(&self) -> f64;
}

/// Playback position measured on the wall clock, for hosts without a media
/// element to query.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    started: Instant,
    duration: Duration,
}

impl WallClock {
    pub fn start(duration: Duration) -> Self {
        Self::started_at(Instant::now(), duration)
    }

    pub fn started_at(started: Instant, duration: Duration) -> Self {
        Self { started, duration }
    }

    pub fn position_at(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.started).as_secs_f64()
    }

    pub fn ended_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.duration
    }
}

impl PlaybackClock for WallClock {
    fn position_secs(&self) -> f64 {
        self.position_at(Instant::now())
    }
}

impl PlaybackClock for f64 {
    fn position_secs(&self) -> f64 {
        *self
    }
}

/// Host media events. Every one of them returns the avatar to idle.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Ended,
    Stopped,
    Error(String),
}

pub fn handle_playback_event(store: &AnimationStateStore, event: PlaybackEvent) {
    match &event {
        PlaybackEvent::Ended => info!("Playback finished"),
        PlaybackEvent::Stopped => info!("Playback stopped by request"),
        PlaybackEvent::Error(reason) => warn!(%reason, "Playback failed"),
    }
    store.stop_playback();
}
