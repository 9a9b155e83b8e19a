//! Involuntary blinking, independent of speech.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use visage_core::config::AvatarConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open { until: Instant },
    Closed { until: Instant },
}

/// Two-state blink timer: open for a random interval, closed briefly, repeat.
pub struct BlinkTimer {
    phase: Phase,
    min_open: Duration,
    max_open: Duration,
    closed: Duration,
    rng: StdRng,
}

impl BlinkTimer {
    pub fn new(min_open: Duration, max_open: Duration, closed: Duration, now: Instant) -> Self {
        Self::with_rng(min_open, max_open, closed, now, StdRng::from_os_rng())
    }

    pub fn from_config(avatar: &AvatarConfig, now: Instant) -> Self {
        Self::new(
            Duration::from_millis(avatar.blink_min_ms),
            Duration::from_millis(avatar.blink_max_ms),
            Duration::from_millis(avatar.blink_closed_ms),
            now,
        )
    }

    /// Deterministic timer for tests and replays.
    pub fn with_rng(
        min_open: Duration,
        max_open: Duration,
        closed: Duration,
        now: Instant,
        rng: StdRng,
    ) -> Self {
        let min_open = min_open.max(Duration::from_millis(1));
        let mut timer = Self {
            phase: Phase::Open { until: now },
            min_open,
            max_open: max_open.max(min_open),
            closed: closed.max(Duration::from_millis(1)),
            rng,
        };
        timer.phase = Phase::Open {
            until: now + timer.next_open_interval(),
        };
        timer
    }

    fn next_open_interval(&mut self) -> Duration {
        let ms = self
            .rng
            .random_range(self.min_open.as_millis() as u64..=self.max_open.as_millis() as u64);
        Duration::from_millis(ms)
    }

    /// Advance to `now` and report whether the eyes are closed.
    pub fn update(&mut self, now: Instant) -> bool {
        loop {
            match self.phase {
                Phase::Open { until } if now >= until => {
                    self.phase = Phase::Closed {
                        until: until + self.closed,
                    };
                }
                Phase::Closed { until } if now >= until => {
                    let next = self.next_open_interval();
                    self.phase = Phase::Open { until: until + next };
                }
                Phase::Open { .. } => return false,
                Phase::Closed { .. } => return true,
            }
        }
    }

    /// Target weight for the blink channels.
    pub fn weight(&mut self, now: Instant) -> f32 {
        if self.update(now) { 1.0 } else { 0.0 }
    }
}
