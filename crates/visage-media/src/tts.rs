//! Speech synthesis client: text in, audio plus optional viseme timing out.

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use visage_core::config::{SynthesisMode, TtsConfig};
use visage_core::error::SynthesisError;
use visage_core::{AudioArtifact, AudioFormat, RawVisemes};

use crate::demux::VisemeDemuxer;
use crate::visemes::{Alignment, visemes_from_alignment};

const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";
pub const DEFAULT_VOICE_ID: &str = "2Lb1en5ujrODDIqmp7F3";
const DEFAULT_MODEL: &str = "eleven_multilingual_v2";
const DEFAULT_OUTPUT_FORMAT: &str = "mp3_44100_128";

/// Result of one synthesis call. `visemes` is `None` when the provider sent no
/// timing metadata, which is a valid outcome.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub audio: AudioArtifact,
    pub visemes: Option<RawVisemes>,
}

/// A text-to-speech backend.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Provider identifier (e.g. "elevenlabs").
    fn id(&self) -> &str;

    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        credential: &str,
    ) -> Result<Synthesis, SynthesisError>;
}

/// ElevenLabs text-to-speech client.
pub struct ElevenLabsClient {
    base_url: String,
    model: String,
    output_format: String,
    mode: SynthesisMode,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TimestampsResponse {
    audio_base64: String,
    #[serde(default)]
    alignment: Option<Alignment>,
}

impl ElevenLabsClient {
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(ELEVENLABS_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: config
                .default_model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.into()),
            output_format: config
                .output_format
                .clone()
                .unwrap_or_else(|| DEFAULT_OUTPUT_FORMAT.into()),
            mode: config.mode,
            client: reqwest::Client::new(),
        }
    }

    pub fn mode(&self) -> SynthesisMode {
        self.mode
    }

    /// Build the request URL for a voice in the configured mode.
    pub fn request_url(&self, voice_id: &str) -> String {
        let endpoint = match self.mode {
            SynthesisMode::Timestamps => "with-timestamps",
            SynthesisMode::Stream => "stream",
        };
        format!(
            "{}/v1/text-to-speech/{voice_id}/{endpoint}?output_format={}",
            self.base_url, self.output_format
        )
    }

    async fn send(
        &self,
        text: &str,
        voice_id: &str,
        credential: &str,
    ) -> Result<reqwest::Response, SynthesisError> {
        let url = self.request_url(voice_id);
        debug!(voice = voice_id, model = %self.model, mode = ?self.mode, text_len = text.len(), "Requesting speech synthesis");

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", credential)
            .header("Content-Type", "application/json")
            .json(&json!({
                "text": text,
                "model_id": self.model,
            }))
            .send()
            .await
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Err(SynthesisError::CredentialRejected {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(SynthesisError::Provider {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn read_stream(
        resp: reqwest::Response,
    ) -> Result<(Vec<u8>, Option<RawVisemes>), SynthesisError> {
        let mut demuxer = VisemeDemuxer::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SynthesisError::Transport(e.to_string()))?;
            demuxer.push(&chunk);
        }

        Ok(demuxer.finish())
    }

    async fn read_timestamps(
        resp: reqwest::Response,
    ) -> Result<(Vec<u8>, Option<RawVisemes>), SynthesisError> {
        let body = resp
            .bytes()
            .await
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;
        let parsed: TimestampsResponse = serde_json::from_slice(&body)
            .map_err(|e| SynthesisError::Malformed(e.to_string()))?;

        let audio = base64::engine::general_purpose::STANDARD
            .decode(parsed.audio_base64.as_bytes())
            .map_err(|e| SynthesisError::Malformed(format!("audio_base64: {e}")))?;

        let visemes = parsed.alignment.as_ref().and_then(visemes_from_alignment);
        Ok((audio, visemes))
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        credential: &str,
    ) -> Result<Synthesis, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }
        if credential.is_empty() {
            return Err(SynthesisError::MissingCredential);
        }
        let voice_id = if voice_id.is_empty() {
            DEFAULT_VOICE_ID
        } else {
            voice_id
        };

        let resp = self.send(text, voice_id, credential).await?;
        let (audio, visemes) = match self.mode {
            SynthesisMode::Stream => Self::read_stream(resp).await?,
            SynthesisMode::Timestamps => Self::read_timestamps(resp).await?,
        };

        if audio.is_empty() {
            return Err(SynthesisError::NoAudio);
        }
        if visemes.is_none() {
            warn!(voice = voice_id, "No viseme data received with synthesized audio");
        }

        let audio = AudioArtifact::new(audio, AudioFormat::from_output_format(&self.output_format));
        info!(
            voice = voice_id,
            bytes = audio.len(),
            visemes = visemes.is_some(),
            "Speech synthesized"
        );

        Ok(Synthesis { audio, visemes })
    }
}
