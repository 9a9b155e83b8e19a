//! One utterance end to end: synthesize, pick an animation source, start playback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use visage_core::error::SynthesisError;
use visage_core::{AnimationTrack, AudioArtifact};
use visage_media::SpeechSynthesizer;
use visage_media::visemes::track_from_raw;

use crate::bridge::{AnimationInference, InferenceRequest};
use crate::playback::{PlaybackEvent, handle_playback_event};
use crate::store::AnimationStateStore;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("An utterance is already in flight")]
    Busy,

    #[error("Utterance abandoned before playback")]
    Cancelled,

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

/// Where the track for an utterance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationSource {
    /// Viseme timing delivered with the synthesized audio.
    Visemes,
    /// The facial animation inference service.
    Inference,
    /// Audio only.
    None,
}

#[derive(Debug, Clone)]
pub struct SpokenUtterance {
    pub audio: AudioArtifact,
    pub track: Option<AnimationTrack>,
    pub source: AnimationSource,
}

/// Per-utterance voice settings, passed through to the providers untouched.
#[derive(Debug, Clone, Default)]
pub struct VoiceSettings {
    pub voice_id: String,
    pub credential: String,
    /// Animation target identity; the configured default when `None`.
    pub target: Option<String>,
}

/// Clears the in-flight flag on every exit path.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SpeechPipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    animator: Option<Arc<dyn AnimationInference>>,
    store: Arc<AnimationStateStore>,
    in_flight: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SpeechPipeline {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        animator: Option<Arc<dyn AnimationInference>>,
        store: Arc<AnimationStateStore>,
    ) -> Self {
        Self {
            synthesizer,
            animator,
            store,
            in_flight: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<AnimationStateStore> {
        &self.store
    }

    /// True while an utterance is being synthesized, animated, or played.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) || self.store.snapshot().is_playing
    }

    /// Speak `text`. On success the store is already playing the result.
    pub async fn speak(
        &self,
        text: &str,
        voice: &VoiceSettings,
    ) -> Result<SpokenUtterance, PipelineError> {
        if self.store.snapshot().is_playing
            || self
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return Err(PipelineError::Busy);
        }
        let _guard = InFlight(&self.in_flight);

        let token = CancellationToken::new();
        self.set_cancel(Some(token.clone()));

        let result = self.run(text, voice, &token).await;
        self.set_cancel(None);
        result
    }

    async fn run(
        &self,
        text: &str,
        voice: &VoiceSettings,
        token: &CancellationToken,
    ) -> Result<SpokenUtterance, PipelineError> {
        let synthesis = self
            .synthesizer
            .synthesize(text, &voice.voice_id, &voice.credential)
            .await
            .inspect_err(|e| error!(kind = e.kind(), error = %e, "Speech synthesis failed"))?;

        let mut source = AnimationSource::None;
        let mut track = synthesis.visemes.as_ref().and_then(track_from_raw);
        if track.is_some() {
            source = AnimationSource::Visemes;
        } else if let Some(animator) = &self.animator {
            let mut request = InferenceRequest::new(
                synthesis.audio.bytes.clone(),
                synthesis.audio.format,
            );
            request.target = voice.target.clone();
            track = animator.infer(&request, token).await;
            if track.is_some() {
                source = AnimationSource::Inference;
            }
        }

        if !self.commit(&synthesis.audio, track.as_ref(), source, token) {
            info!("Utterance abandoned, discarding result");
            return Err(PipelineError::Cancelled);
        }

        Ok(SpokenUtterance {
            audio: synthesis.audio,
            track,
            source,
        })
    }

    /// Start playback unless `token` was cancelled. The cancel slot stays
    /// locked across the check and the store write, so [`Self::cancel`]
    /// either sees this playback and stops it or wins before it starts.
    fn commit(
        &self,
        audio: &AudioArtifact,
        track: Option<&AnimationTrack>,
        source: AnimationSource,
        token: &CancellationToken,
    ) -> bool {
        let _slot = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            return false;
        }
        info!(
            audio_bytes = audio.len(),
            frames = track.map(|t| t.len()).unwrap_or(0),
            source = ?source,
            "Starting playback"
        );
        self.store.start_playback(audio.clone(), track.cloned());
        true
    }

    fn set_cancel(&self, token: Option<CancellationToken>) {
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// Abandon the utterance in flight, if any, and stop playback.
    pub fn cancel(&self) {
        let slot = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = slot.as_ref() {
            token.cancel();
        }
        handle_playback_event(&self.store, PlaybackEvent::Stopped);
    }

    /// Forward a host media event.
    pub fn on_playback_event(&self, event: PlaybackEvent) {
        handle_playback_event(&self.store, event);
    }
}
