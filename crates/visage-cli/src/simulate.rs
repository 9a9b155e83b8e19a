//! Headless render loop: drives a morph rig from the state store on the wall
//! clock, the way a browser frame loop would.

use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use visage_animation::driver::Weights;
use visage_animation::playback::{PlaybackEvent, WallClock};
use visage_animation::{AnimationDriver, MorphTargetRig, SpeechPipeline};
use visage_core::config::AvatarConfig;
use visage_core::track::{BLINK_CHANNELS, FALLBACK_BLENDSHAPES, is_blink_channel};
use visage_core::{AnimationTrack, AudioArtifact};
use visage_media::visemes::VISEME_NAMES;

/// Bitrate assumed for compressed clips when estimating their length.
const MP3_BITS_PER_SEC: f64 = 128_000.0;

/// Frames rendered after playback ends, so the mouth can relax.
const RELAX_SECS: f64 = 0.5;

#[derive(Debug, Default)]
pub struct SimulationReport {
    pub frames: u64,
    pub peak_mouth: f32,
    pub clips: Vec<String>,
    pub final_weights: Weights,
}

/// Length of a clip: exact for PCM, else the track's end, else a bitrate estimate.
pub fn playback_duration(audio: &AudioArtifact, track: Option<&AnimationTrack>) -> Duration {
    let secs = audio
        .duration_secs()
        .or_else(|| track.map(AnimationTrack::duration_secs).filter(|d| *d > 0.0))
        .unwrap_or_else(|| audio.len() as f64 * 8.0 / MP3_BITS_PER_SEC);
    Duration::from_secs_f64(secs)
}

/// Headless rig carrying every channel the driver may write.
pub fn rig_for(avatar: &AvatarConfig, track: Option<&AnimationTrack>) -> MorphTargetRig {
    let mut names: Vec<&str> = FALLBACK_BLENDSHAPES.to_vec();
    names.extend(VISEME_NAMES);
    names.extend(BLINK_CHANNELS);
    if let Some(track) = track {
        names.extend(track.names().iter().map(String::as_str));
    }
    MorphTargetRig::with_meshes(&avatar.meshes, &names)
}

/// Render until playback has ended and the face has relaxed.
pub async fn run(
    pipeline: &SpeechPipeline,
    avatar: &AvatarConfig,
    rig: &mut MorphTargetRig,
    duration: Duration,
) -> SimulationReport {
    let clips = [
        avatar.idle_clip.clone(),
        avatar.speaking_clip.clone(),
        avatar.fallback_clip.clone(),
    ];
    let started = Instant::now();
    let mut driver = AnimationDriver::from_config(avatar, clips, started);
    let clock = WallClock::started_at(started, duration);

    let period = Duration::from_secs_f64(1.0 / avatar.frame_rate.max(1) as f64);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut report = SimulationReport::default();
    let mut stopped_at: Option<Instant> = None;
    info!(duration_ms = duration.as_millis() as u64, fps = avatar.frame_rate, "Simulating playback");

    loop {
        ticker.tick().await;
        let now = Instant::now();
        let state = pipeline.store().snapshot();

        if let Some(transition) = driver.tick(&state, clock.position_at(now), now, rig) {
            debug!(fade_in = ?transition.fade_in, fade_out = ?transition.fade_out, "Body clip change");
            if let Some(clip) = transition.fade_in {
                report.clips.push(clip);
            }
        }
        report.frames += 1;

        let mouth = driver
            .weights()
            .iter()
            .filter(|(name, _)| !is_blink_channel(name))
            .map(|(_, w)| *w)
            .fold(0.0, f32::max);
        report.peak_mouth = report.peak_mouth.max(mouth);

        if state.is_playing {
            if clock.ended_at(now) {
                pipeline.on_playback_event(PlaybackEvent::Ended);
            }
            continue;
        }

        let stopped = *stopped_at.get_or_insert(now);
        if now.duration_since(stopped).as_secs_f64() >= RELAX_SECS {
            break;
        }
    }

    report.final_weights = driver.weights().clone();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use visage_animation::AnimationStateStore;
    use visage_core::error::SynthesisError;
    use visage_core::{AudioFormat, Frame};
    use visage_media::{SpeechSynthesizer, Synthesis};

    fn track() -> AnimationTrack {
        AnimationTrack::from_parts(
            vec!["jawOpen".into()],
            vec![Frame::new(0.0, vec![0.0]), Frame::new(0.1, vec![1.0]), Frame::new(0.3, vec![0.0])],
        )
        .unwrap()
    }

    #[test]
    fn test_duration_sources() {
        let pcm = AudioArtifact::new(vec![0u8; 32_000], AudioFormat::pcm16_mono(16_000));
        assert_eq!(playback_duration(&pcm, None), Duration::from_secs(1));

        let mp3 = AudioArtifact::new(vec![0u8; 16_000], AudioFormat::from_output_format("mp3_44100_128"));
        assert_eq!(playback_duration(&mp3, None), Duration::from_secs(1));
        let t = track();
        assert!((playback_duration(&mp3, Some(&t)).as_secs_f64() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_rig_has_track_and_blink_channels() {
        let avatar = AvatarConfig::default();
        let t = AnimationTrack::from_parts(vec!["tongueOut".into()], vec![Frame::new(0.0, vec![1.0])]).unwrap();
        let rig = rig_for(&avatar, Some(&t));
        assert_eq!(rig.influence("Wolf3D_Head", "tongueOut"), Some(0.0));
        assert_eq!(rig.influence("EyeLeft", "EyeBlinkLeft"), Some(0.0));
        assert_eq!(rig.influence("Wolf3D_Teeth", "viseme_sil"), Some(0.0));
    }

    struct Silent;

    #[async_trait]
    impl SpeechSynthesizer for Silent {
        fn id(&self) -> &str {
            "silent"
        }

        async fn synthesize(&self, _: &str, _: &str, _: &str) -> Result<Synthesis, SynthesisError> {
            Err(SynthesisError::NoAudio)
        }
    }

    #[tokio::test]
    async fn test_run_ends_playback_and_relaxes() {
        let avatar = AvatarConfig {
            frame_rate: 100,
            lip_sync_smoothing: 1.0,
            ..AvatarConfig::default()
        };
        let store = Arc::new(AnimationStateStore::from_config(&avatar));
        let pipeline = SpeechPipeline::new(Arc::new(Silent), None, store.clone());
        let audio = AudioArtifact::new(vec![0u8; 6_400], AudioFormat::pcm16_mono(16_000));
        let t = track();
        store.start_playback(audio.clone(), Some(t.clone()));

        let mut rig = rig_for(&avatar, Some(&t));
        let report = run(&pipeline, &avatar, &mut rig, playback_duration(&audio, Some(&t))).await;

        assert!(!store.snapshot().is_playing);
        assert!(!pipeline.is_busy());
        assert!(report.frames > 10);
        assert!(report.peak_mouth > 0.3, "peak {}", report.peak_mouth);
        assert!(report.final_weights.get("jawOpen").copied().unwrap_or(0.0) < 0.05);
        assert_eq!(report.clips.first().map(String::as_str), Some("Talking"));
        assert_eq!(report.clips.last().map(String::as_str), Some("Idle"));
    }
}
