//! Body animation clip selection with crossfades.

use std::collections::HashSet;

use tracing::warn;

pub const CLIP_FADE_SECS: f32 = 0.5;

/// Crossfade instruction for the host animation mixer.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipTransition {
    pub fade_out: Option<String>,
    /// `None` when neither the requested clip nor the fallback exists.
    pub fade_in: Option<String>,
    pub fade_secs: f32,
}

/// Follows the state's `animation_name` and emits a transition whenever the
/// clip that should be playing changes.
pub struct BodyAnimator {
    clips: HashSet<String>,
    fallback: String,
    requested: Option<String>,
    current: Option<String>,
    warned_missing: bool,
}

impl BodyAnimator {
    pub fn new<I, S>(clips: I, fallback: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            clips: clips.into_iter().map(Into::into).collect(),
            fallback: fallback.into(),
            requested: None,
            current: None,
            warned_missing: false,
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn resolve(&mut self, requested: &str) -> Option<String> {
        if self.clips.contains(requested) {
            return Some(requested.to_string());
        }
        if self.clips.contains(&self.fallback) {
            return Some(self.fallback.clone());
        }
        if !self.warned_missing {
            warn!(clip = requested, fallback = %self.fallback, "Animation clip not found on rig");
            self.warned_missing = true;
        }
        None
    }

    pub fn observe(&mut self, animation_name: &str) -> Option<ClipTransition> {
        if self.requested.as_deref() == Some(animation_name) {
            return None;
        }
        self.requested = Some(animation_name.to_string());

        let next = self.resolve(animation_name);
        if next == self.current {
            return None;
        }
        let fade_out = std::mem::replace(&mut self.current, next.clone());
        Some(ClipTransition {
            fade_out,
            fade_in: next,
            fade_secs: CLIP_FADE_SECS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossfade_between_clips() {
        let mut body = BodyAnimator::new(["Idle", "Talking"], "W_2");
        let first = body.observe("Idle").unwrap();
        assert_eq!(first.fade_out, None);
        assert_eq!(first.fade_in.as_deref(), Some("Idle"));

        assert!(body.observe("Idle").is_none());

        let next = body.observe("Talking").unwrap();
        assert_eq!(next.fade_out.as_deref(), Some("Idle"));
        assert_eq!(next.fade_in.as_deref(), Some("Talking"));
        assert_eq!(next.fade_secs, 0.5);
    }

    #[test]
    fn test_missing_clip_uses_fallback() {
        let mut body = BodyAnimator::new(["Idle", "W_2"], "W_2");
        body.observe("Idle");
        let t = body.observe("Talking").unwrap();
        assert_eq!(t.fade_in.as_deref(), Some("W_2"));
        assert_eq!(body.current(), Some("W_2"));
    }

    #[test]
    fn test_nothing_plays_without_fallback() {
        let mut body = BodyAnimator::new(["Idle"], "W_2");
        body.observe("Idle");
        let t = body.observe("Dance").unwrap();
        assert_eq!(t.fade_out.as_deref(), Some("Idle"));
        assert_eq!(t.fade_in, None);
        assert!(body.observe("Jump").is_none());
    }
}
