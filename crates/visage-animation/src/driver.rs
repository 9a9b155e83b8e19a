//! Per-frame morph target driver.
//!
//! The host render loop calls [`AnimationDriver::tick`] once per display
//! frame. Lip-sync weights come from the pure [`step`] function; blinking is
//! owned by [`BlinkTimer`] and never touched by lip-sync.

use std::collections::HashMap;
use std::time::Instant;

use tracing::trace;

use visage_core::config::AvatarConfig;
use visage_core::track::{FALLBACK_BLENDSHAPES, BLINK_CHANNELS, is_blink_channel};
use visage_core::{AnimationTrack, Frame};

use crate::blink::BlinkTimer;
use crate::body::{BodyAnimator, ClipTransition};
use crate::morph::MorphTargetSurface;
use crate::store::AnimationState;

pub type Weights = HashMap<String, f32>;

/// Per-tick exponential smoothing factors, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothing {
    pub lip_sync: f32,
    pub relax: f32,
    pub blink: f32,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self::from(&AvatarConfig::default())
    }
}

impl From<&AvatarConfig> for Smoothing {
    fn from(avatar: &AvatarConfig) -> Self {
        Self {
            lip_sync: avatar.lip_sync_smoothing.clamp(0.0, 1.0),
            relax: avatar.relax_smoothing.clamp(0.0, 1.0),
            blink: avatar.blink_smoothing.clamp(0.0, 1.0),
        }
    }
}

pub fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t
}

/// The two frames bracketing a playback position.
#[derive(Debug, Clone, Copy)]
pub struct FrameQuery<'a> {
    pub previous: &'a Frame,
    pub next: &'a Frame,
    /// Interpolation factor in `[0, 1]`.
    pub t: f32,
}

/// Locate the frames around `position` seconds. `None` only for an empty timecourse.
///
/// Past the last frame the query holds on it.
pub fn frame_query(track: &AnimationTrack, position: f64) -> Option<FrameQuery<'_>> {
    let timecourse = track.timecourse();
    if timecourse.is_empty() {
        return None;
    }

    let index = timecourse
        .partition_point(|f| f.time_code < position)
        .min(timecourse.len() - 1);
    let next = &timecourse[index];
    let previous = &timecourse[index.saturating_sub(1)];

    let span = next.time_code - previous.time_code;
    let t = if span <= 0.0 {
        if position >= next.time_code { 1.0 } else { 0.0 }
    } else {
        ((position - previous.time_code) / span).clamp(0.0, 1.0)
    };

    Some(FrameQuery {
        previous,
        next,
        t: t as f32,
    })
}

/// Raw interpolated weight vector at `position`, in `track.names()` order.
pub fn interpolate(track: &AnimationTrack, position: f64) -> Option<Vec<f32>> {
    let query = frame_query(track, position)?;
    Some(
        query
            .previous
            .values
            .iter()
            .zip(&query.next.values)
            .map(|(&a, &b)| lerp(a, b, query.t))
            .collect(),
    )
}

/// Advance lip-sync weights by one tick.
///
/// With a track, each non-blink channel moves toward the interpolated value
/// at `position`, and channels the track does not carry relax. Without one, every name in `relax_names` decays toward
/// zero. Blink channels are carried over untouched.
pub fn step(
    track: Option<&AnimationTrack>,
    position: f64,
    previous: &Weights,
    relax_names: &[String],
    smoothing: Smoothing,
) -> Weights {
    let mut next = previous.clone();

    match track {
        Some(track) => {
            let Some(targets) = interpolate(track, position) else {
                return next;
            };
            for (name, target) in track.names().iter().zip(targets) {
                if is_blink_channel(name) {
                    continue;
                }
                let current = previous.get(name).copied().unwrap_or(0.0);
                next.insert(name.clone(), lerp(current, target, smoothing.lip_sync));
            }
            for (name, &current) in previous {
                if is_blink_channel(name) || track.names().contains(name) {
                    continue;
                }
                next.insert(name.clone(), lerp(current, 0.0, smoothing.relax));
            }
        }
        None => {
            for name in relax_names {
                if is_blink_channel(name) {
                    continue;
                }
                let current = previous.get(name).copied().unwrap_or(0.0);
                next.insert(name.clone(), lerp(current, 0.0, smoothing.relax));
            }
        }
    }

    next
}

pub struct AnimationDriver {
    meshes: Vec<String>,
    smoothing: Smoothing,
    weights: Weights,
    blink_weight: f32,
    /// Names from the last track seen, relaxed when nothing is playing.
    known_names: Vec<String>,
    blink: BlinkTimer,
    body: BodyAnimator,
}

impl AnimationDriver {
    pub fn new(meshes: Vec<String>, smoothing: Smoothing, blink: BlinkTimer, body: BodyAnimator) -> Self {
        Self {
            meshes,
            smoothing,
            weights: Weights::new(),
            blink_weight: 0.0,
            known_names: FALLBACK_BLENDSHAPES.iter().map(|n| n.to_string()).collect(),
            blink,
            body,
        }
    }

    /// Driver for a rig with the given body clips.
    pub fn from_config<I, S>(avatar: &AvatarConfig, clips: I, now: Instant) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            avatar.meshes.clone(),
            Smoothing::from(avatar),
            BlinkTimer::from_config(avatar, now),
            BodyAnimator::new(clips, avatar.fallback_clip.clone()),
        )
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    pub fn blink_weight(&self) -> f32 {
        self.blink_weight
    }

    pub fn known_names(&self) -> &[String] {
        &self.known_names
    }

    /// Run one frame. Returns a body clip transition when the clip changes.
    pub fn tick(
        &mut self,
        state: &AnimationState,
        position: f64,
        now: Instant,
        surface: &mut dyn MorphTargetSurface,
    ) -> Option<ClipTransition> {
        let blink_target = self.blink.weight(now);
        self.blink_weight = lerp(self.blink_weight, blink_target, self.smoothing.blink);
        for mesh in &self.meshes {
            for channel in BLINK_CHANNELS {
                surface.set_morph_target(mesh, channel, self.blink_weight);
            }
        }

        let clip = self.body.observe(&state.animation_name);

        let track = state.track.as_ref().filter(|_| state.is_playing);
        if let Some(track) = track {
            if track.is_empty() {
                trace!("Empty timecourse, skipping lip-sync this frame");
                return clip;
            }
            if self.known_names != track.names() {
                self.known_names = track.names().to_vec();
            }
        }

        self.weights = step(track, position, &self.weights, &self.known_names, self.smoothing);

        for mesh in &self.meshes {
            for (name, &weight) in &self.weights {
                if !is_blink_channel(name) {
                    surface.set_morph_target(mesh, name, weight);
                }
            }
        }

        clip
    }
}
