//! `visage speak`: one utterance through the pipeline, saved to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use visage_animation::pipeline::SpokenUtterance;
use visage_animation::playback::PlaybackEvent;
use visage_animation::{
    AnimationInference, AnimationStateStore, FacialAnimationBridge, SpeechPipeline, VoiceSettings,
};
use visage_core::config::Config;
use visage_media::ElevenLabsClient;

use crate::simulate;

pub struct SpeakOptions {
    pub voice: Option<String>,
    pub target: Option<String>,
    pub simulate: bool,
}

/// Wire synthesis, the optional inference bridge, and the store.
pub fn build_pipeline(config: &Config) -> SpeechPipeline {
    let synthesizer = Arc::new(ElevenLabsClient::new(&config.tts()));
    let animator = config.animation_enabled().then(|| {
        Arc::new(FacialAnimationBridge::new(config.animation())) as Arc<dyn AnimationInference>
    });
    let store = Arc::new(AnimationStateStore::from_config(&config.avatar()));
    SpeechPipeline::new(synthesizer, animator, store)
}

pub fn voice_settings(config: &Config, opts: &SpeakOptions) -> VoiceSettings {
    let tts = config.tts();
    VoiceSettings {
        voice_id: opts
            .voice
            .clone()
            .or(tts.default_voice.clone())
            .unwrap_or_default(),
        credential: tts.resolve_api_key().unwrap_or_default(),
        target: opts.target.clone(),
    }
}

/// Write the clip and its track (if any) under `dir`.
pub fn save_utterance(dir: &Path, utterance: &SpokenUtterance) -> anyhow::Result<(PathBuf, Option<PathBuf>)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let id = utterance.audio.id.simple().to_string();
    let stem = format!(
        "{}-{}",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        &id[..8]
    );

    let audio_path = dir.join(format!("{stem}.{}", utterance.audio.format.extension()));
    std::fs::write(&audio_path, &utterance.audio.bytes)?;

    let track_path = match &utterance.track {
        Some(track) => {
            let path = dir.join(format!("{stem}.track.json"));
            std::fs::write(&path, serde_json::to_vec_pretty(track)?)?;
            Some(path)
        }
        None => None,
    };
    Ok((audio_path, track_path))
}

pub async fn run(config: &Config, text: &str, opts: SpeakOptions) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config);
    let voice = voice_settings(config, &opts);

    let utterance = tokio::select! {
        result = pipeline.speak(text, &voice) => result?,
        _ = tokio::signal::ctrl_c() => {
            pipeline.cancel();
            anyhow::bail!("Interrupted");
        }
    };

    let (audio_path, track_path) = save_utterance(&config.audio_dir(), &utterance)?;
    println!("Audio: {}", audio_path.display());
    match &track_path {
        Some(path) => println!("Track: {} ({:?})", path.display(), utterance.source),
        None => println!("Track: none (audio only)"),
    }

    if opts.simulate {
        let avatar = config.avatar();
        let mut rig = simulate::rig_for(&avatar, utterance.track.as_ref());
        let duration = simulate::playback_duration(&utterance.audio, utterance.track.as_ref());
        let report = simulate::run(&pipeline, &avatar, &mut rig, duration).await;
        info!(frames = report.frames, peak_mouth = report.peak_mouth, "Simulation finished");
        println!(
            "Simulated {} frames, peak mouth weight {:.2}, clips: {}",
            report.frames,
            report.peak_mouth,
            report.clips.join(" -> ")
        );
    } else {
        // No renderer attached.
        pipeline.on_playback_event(PlaybackEvent::Stopped);
    }
    Ok(())
}
