//! Single-writer playback state shared by the pipeline, UI, and render loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use visage_core::config::AvatarConfig;
use visage_core::{AnimationTrack, AudioArtifact};

/// What the avatar is doing right now.
///
/// `is_playing` implies `audio.is_some()`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationState {
    /// Body animation clip to play.
    pub animation_name: String,
    pub audio: Option<AudioArtifact>,
    pub track: Option<AnimationTrack>,
    pub is_playing: bool,
}

impl AnimationState {
    pub fn idle(idle_clip: &str) -> Self {
        Self {
            animation_name: idle_clip.to_string(),
            audio: None,
            track: None,
            is_playing: false,
        }
    }
}

/// Holder of the one [`AnimationState`].
///
/// Only [`start_playback`](Self::start_playback) and
/// [`stop_playback`](Self::stop_playback) change it; each swaps in a whole
/// new state, so readers never see a half-applied update.
pub struct AnimationStateStore {
    tx: watch::Sender<Arc<AnimationState>>,
    idle_clip: String,
    speaking_clip: String,
}

impl AnimationStateStore {
    pub fn new(idle_clip: impl Into<String>, speaking_clip: impl Into<String>) -> Self {
        let idle_clip = idle_clip.into();
        let (tx, _) = watch::channel(Arc::new(AnimationState::idle(&idle_clip)));
        Self {
            tx,
            idle_clip,
            speaking_clip: speaking_clip.into(),
        }
    }

    pub fn from_config(avatar: &AvatarConfig) -> Self {
        Self::new(avatar.idle_clip.clone(), avatar.speaking_clip.clone())
    }

    /// The state a fresh store starts in.
    pub fn default_state(&self) -> AnimationState {
        AnimationState::idle(&self.idle_clip)
    }

    /// Begin playing `audio`. An empty track is stored as absent.
    pub fn start_playback(&self, audio: AudioArtifact, track: Option<AnimationTrack>) {
        let track = track.filter(|t| !t.is_empty() && !t.names().is_empty());
        debug!(
            audio_id = %audio.id,
            frames = track.as_ref().map(|t| t.len()).unwrap_or(0),
            "Playback started"
        );
        self.tx.send_replace(Arc::new(AnimationState {
            animation_name: self.speaking_clip.clone(),
            audio: Some(audio),
            track,
            is_playing: true,
        }));
    }

    /// Return to idle. Safe to call in any state.
    pub fn stop_playback(&self) {
        debug!("Playback stopped");
        self.tx.send_replace(Arc::new(self.default_state()));
    }

    pub fn snapshot(&self) -> Arc<AnimationState> {
        self.tx.borrow().clone()
    }

    /// Observe every future state change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AnimationState>> {
        self.tx.subscribe()
    }
}

impl Default for AnimationStateStore {
    fn default() -> Self {
        Self::from_config(&AvatarConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use visage_core::{AudioFormat, Frame};

    fn audio() -> AudioArtifact {
        AudioArtifact::new(vec![1, 2, 3], AudioFormat::from_output_format("mp3_44100_128"))
    }

    fn track() -> AnimationTrack {
        AnimationTrack::from_parts(
            vec!["jawOpen".into()],
            vec![Frame::new(0.0, vec![0.0]), Frame::new(1.0, vec![1.0])],
        )
        .unwrap()
    }

    #[test]
    fn test_starts_idle() {
        let store = AnimationStateStore::default();
        let state = store.snapshot();
        assert_eq!(state.animation_name, "Idle");
        assert!(!state.is_playing);
        assert!(state.audio.is_none());
        assert!(state.track.is_none());
    }

    #[test]
    fn test_start_playback_sets_everything() {
        let store = AnimationStateStore::default();
        store.start_playback(audio(), Some(track()));
        let state = store.snapshot();
        assert!(state.is_playing);
        assert!(state.audio.is_some());
        assert_eq!(state.track.as_ref().map(|t| t.len()), Some(2));
        assert_eq!(state.animation_name, "Talking");
    }

    #[test]
    fn test_stop_is_idempotent() {
        let store = AnimationStateStore::default();
        store.stop_playback();
        store.stop_playback();
        assert_eq!(*store.snapshot(), store.default_state());

        store.start_playback(audio(), None);
        store.stop_playback();
        store.stop_playback();
        let state = store.snapshot();
        assert!(!state.is_playing);
        assert!(state.audio.is_none());
        assert!(state.track.is_none());
    }

    #[test]
    fn test_start_then_stop_round_trips_to_default() {
        let store = AnimationStateStore::new("Idle", "Talking");
        let before = store.snapshot();
        store.start_playback(audio(), Some(track()));
        store.stop_playback();
        assert_eq!(*store.snapshot(), *before);
    }


    #[test]
    fn test_old_snapshot_is_unaffected_by_updates() {
        let store = AnimationStateStore::default();
        let before = store.snapshot();
        store.start_playback(audio(), None);
        assert!(!before.is_playing);
        assert!(store.snapshot().is_playing);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let store = AnimationStateStore::default();
        let mut rx = store.subscribe();
        store.start_playback(audio(), None);
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_playing);
    }
}
