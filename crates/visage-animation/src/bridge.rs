//! Facial animation inference over a bidirectional WebSocket stream.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use visage_core::config::AnimationConfig;
use visage_core::error::AnimationInferenceError;
use visage_core::{AnimationTrack, AudioFormat, Frame};

use crate::protocol::{ClientMessage, ServerMessage};

/// Audio for one utterance, as handed to the inference service.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub audio: Bytes,
    pub format: AudioFormat,
    pub session_id: String,
    /// Avatar identity name or raw function id; the configured default when `None`.
    pub target: Option<String>,
}

impl InferenceRequest {
    pub fn new(audio: Bytes, format: AudioFormat) -> Self {
        Self {
            audio,
            format,
            session_id: Uuid::new_v4().to_string(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// An animation inference backend.
#[async_trait]
pub trait AnimationInference: Send + Sync {
    /// Run inference, surfacing every failure.
    async fn try_infer(
        &self,
        request: &InferenceRequest,
        cancel: &CancellationToken,
    ) -> Result<AnimationTrack, AnimationInferenceError>;

    /// Run inference; any failure degrades to `None` so audio can play without animation.
    async fn infer(
        &self,
        request: &InferenceRequest,
        cancel: &CancellationToken,
    ) -> Option<AnimationTrack> {
        match self.try_infer(request, cancel).await {
            Ok(track) => Some(track),
            Err(e) => {
                warn!(session_id = %request.session_id, error = %e, "Animation inference failed, continuing audio-only");
                None
            }
        }
    }
}

/// Whether the stream should keep going after a server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Continue,
    Done,
}

/// Collects server messages for one call. Nothing outside the bridge sees
/// the partial state.
#[derive(Debug, Default)]
pub struct TrackAccumulator {
    names: Vec<String>,
    frames: Vec<Frame>,
    dropped: usize,
}

impl TrackAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn apply(&mut self, message: ServerMessage) -> Result<Progress, AnimationInferenceError> {
        match message {
            ServerMessage::Header { names } => {
                if self.names.is_empty() {
                    self.names = names;
                } else if self.names != names {
                    warn!("Ignoring repeated animation header with different names");
                }
                Ok(Progress::Continue)
            }
            ServerMessage::Frames { frames } => {
                for frame in frames {
                    // Before the header arrives the width is unknown; assembly checks it.
                    if !self.names.is_empty() && frame.values.len() != self.names.len() {
                        self.dropped += 1;
                        continue;
                    }
                    self.frames.push(frame);
                }
                Ok(Progress::Continue)
            }
            ServerMessage::Status { code: 0, .. } => Ok(Progress::Done),
            ServerMessage::Status { code, message } => Err(AnimationInferenceError::Server(
                format!("status {code}: {message}"),
            )),
            ServerMessage::Error { message } => Err(AnimationInferenceError::Server(message)),
        }
    }

    /// Assemble the sorted track, or `Empty` when names or frames are missing.
    pub fn finish(self) -> Result<AnimationTrack, AnimationInferenceError> {
        if self.dropped > 0 {
            debug!(dropped = self.dropped, "Dropped animation frames with mismatched width");
        }
        AnimationTrack::from_parts(self.names, self.frames).ok_or(AnimationInferenceError::Empty)
    }
}

/// Client for the streaming animation inference service.
///
/// Holds only connection settings, so one instance serves any number of
/// concurrent calls.
pub struct FacialAnimationBridge {
    config: AnimationConfig,
    api_key: Option<String>,
}

impl FacialAnimationBridge {
    pub fn new(config: AnimationConfig) -> Self {
        let api_key = config.resolve_api_key();
        Self { config, api_key }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn run_session(
        &self,
        request: &InferenceRequest,
        api_key: &str,
    ) -> Result<AnimationTrack, AnimationInferenceError> {
        let target_id = self.config.resolve_target(request.target.as_deref());

        let mut ws_request = self
            .config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| AnimationInferenceError::Connect(e.to_string()))?;
        let headers = ws_request.headers_mut();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| AnimationInferenceError::Connect(e.to_string()))?,
        );
        headers.insert(
            "function-id",
            HeaderValue::from_str(&target_id)
                .map_err(|e| AnimationInferenceError::Connect(e.to_string()))?,
        );

        let (ws, _) = tokio_tungstenite::connect_async(ws_request)
            .await
            .map_err(|e| AnimationInferenceError::Connect(e.to_string()))?;
        debug!(session_id = %request.session_id, target = %target_id, "Animation stream opened");

        let (mut write, mut read) = ws.split();
        let header = ClientMessage::SessionHeader {
            session_id: request.session_id.clone(),
            target_id,
            audio_format: request.format,
        };
        let chunk_bytes = self.config.chunk_bytes.max(1);

        let sender = async {
            let header = serde_json::to_string(&header)
                .map_err(|e| AnimationInferenceError::Malformed(e.to_string()))?;
            write
                .send(Message::Text(header.into()))
                .await
                .map_err(|e| AnimationInferenceError::Transport(e.to_string()))?;

            let mut offset = 0;
            while offset < request.audio.len() {
                let end = (offset + chunk_bytes).min(request.audio.len());
                write
                    .send(Message::Binary(request.audio.slice(offset..end)))
                    .await
                    .map_err(|e| AnimationInferenceError::Transport(e.to_string()))?;
                offset = end;
            }

            let end = serde_json::to_string(&ClientMessage::EndOfAudio)
                .map_err(|e| AnimationInferenceError::Malformed(e.to_string()))?;
            write
                .send(Message::Text(end.into()))
                .await
                .map_err(|e| AnimationInferenceError::Transport(e.to_string()))
        };
        tokio::pin!(sender);

        let mut accumulator = TrackAccumulator::new();
        let mut sending = true;
        let mut send_error = None;

        loop {
            tokio::select! {
                sent = &mut sender, if sending => {
                    sending = false;
                    match sent {
                        Ok(()) => debug!(session_id = %request.session_id, bytes = request.audio.len(), "Audio sent"),
                        // Keep reading: the server may still explain why.
                        Err(e) => send_error = Some(e),
                    }
                }
                incoming = read.next() => {
                    let message = match incoming {
                        None | Some(Ok(Message::Close(_))) => break,
                        Some(Err(e)) => return Err(AnimationInferenceError::Transport(e.to_string())),
                        Some(Ok(Message::Text(text))) => serde_json::from_str::<ServerMessage>(&text)
                            .map_err(|e| AnimationInferenceError::Malformed(e.to_string()))?,
                        Some(Ok(_)) => continue,
                    };
                    if accumulator.apply(message)? == Progress::Done {
                        break;
                    }
                }
            }
        }

        if let Some(e) = send_error {
            return Err(e);
        }
        let track = accumulator.finish()?;
        info!(
            session_id = %request.session_id,
            frames = track.len(),
            names = track.names().len(),
            "Animation track received"
        );
        Ok(track)
    }
}

#[async_trait]
impl AnimationInference for FacialAnimationBridge {
    async fn try_infer(
        &self,
        request: &InferenceRequest,
        cancel: &CancellationToken,
    ) -> Result<AnimationTrack, AnimationInferenceError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(AnimationInferenceError::MissingCredential)?;
        let timeout = self.timeout();

        // Dropping the session future closes the socket.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AnimationInferenceError::Cancelled),
            result = tokio::time::timeout(timeout, self.run_session(request, api_key)) => {
                result.unwrap_or(Err(AnimationInferenceError::Timeout(timeout)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(t: f64, values: Vec<f32>) -> Frame {
        Frame::new(t, values)
    }

    #[test]
    fn test_accumulator_appends_and_sorts() {
        let mut acc = TrackAccumulator::new();
        acc.apply(ServerMessage::Header { names: vec!["a".into(), "b".into()] }).unwrap();
        acc.apply(ServerMessage::Frames {
            frames: vec![frame(0.2, vec![0.2, 0.2]), frame(0.0, vec![0.0, 0.0])],
        })
        .unwrap();
        acc.apply(ServerMessage::Frames { frames: vec![frame(0.1, vec![0.1, 0.1])] }).unwrap();
        assert_eq!(acc.frame_count(), 3);

        let done = acc.apply(ServerMessage::Status { code: 0, message: String::new() }).unwrap();
        assert_eq!(done, Progress::Done);

        let track = acc.finish().unwrap();
        let times: Vec<f64> = track.timecourse().iter().map(|f| f.time_code).collect();
        assert_eq!(times, vec![0.0, 0.1, 0.2]);
    }

    #[test]
    fn test_accumulator_drops_mismatched_frames() {
        let mut acc = TrackAccumulator::new();
        acc.apply(ServerMessage::Header { names: vec!["jawOpen".into()] }).unwrap();
        acc.apply(ServerMessage::Frames {
            frames: vec![frame(0.0, vec![0.0]), frame(0.1, vec![0.1, 0.9]), frame(0.2, vec![])],
        })
        .unwrap();
        assert_eq!(acc.dropped(), 2);
        assert_eq!(acc.finish().unwrap().len(), 1);
    }

    #[test]
    fn test_frames_before_header_are_checked_on_finish() {
        let mut acc = TrackAccumulator::new();
        acc.apply(ServerMessage::Frames {
            frames: vec![frame(0.0, vec![1.0]), frame(0.1, vec![1.0, 2.0])],
        })
        .unwrap();
        acc.apply(ServerMessage::Header { names: vec!["x".into()] }).unwrap();
        assert_eq!(acc.finish().unwrap().len(), 1);
    }

    #[test]
    fn test_server_error_discards_partial_frames() {
        let mut acc = TrackAccumulator::new();
        acc.apply(ServerMessage::Header { names: vec!["jawOpen".into()] }).unwrap();
        let frames = (0..10).map(|i| frame(i as f64 * 0.1, vec![0.5])).collect();
        acc.apply(ServerMessage::Frames { frames }).unwrap();

        let err = acc.apply(ServerMessage::Error { message: "model crashed".into() }).unwrap_err();
        assert!(matches!(err, AnimationInferenceError::Server(_)));

        let err = TrackAccumulator::new()
            .apply(ServerMessage::Status { code: 13, message: "internal".into() })
            .unwrap_err();
        assert!(err.to_string().contains("status 13"));
    }

    #[test]
    fn test_missing_names_or_frames_is_empty() {
        let acc = TrackAccumulator::new();
        assert!(matches!(acc.finish(), Err(AnimationInferenceError::Empty)));

        let mut acc = TrackAccumulator::new();
        acc.apply(ServerMessage::Header { names: vec!["a".into()] }).unwrap();
        assert!(matches!(acc.finish(), Err(AnimationInferenceError::Empty)));
    }

    #[tokio::test]
    async fn test_missing_credential_short_circuits() {
        let config = AnimationConfig {
            api_key: None,
            api_key_env: Some("VISAGE_TEST_UNSET_A2F_KEY".into()),
            ..AnimationConfig::default()
        };
        let bridge = FacialAnimationBridge::new(config);
        let request = InferenceRequest::new(Bytes::from_static(b"pcm"), AudioFormat::pcm16_mono(16_000));
        let cancel = CancellationToken::new();

        let err = bridge.try_infer(&request, &cancel).await.unwrap_err();
        assert!(matches!(err, AnimationInferenceError::MissingCredential));
        assert!(bridge.infer(&request, &cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_connect() {
        let config = AnimationConfig {
            endpoint: "ws://127.0.0.1:9/never".into(),
            ..AnimationConfig::default()
        };
        let bridge = FacialAnimationBridge::new(config).with_api_key("k");
        let request = InferenceRequest::new(Bytes::from_static(b"pcm"), AudioFormat::pcm16_mono(16_000));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = bridge.try_infer(&request, &cancel).await.unwrap_err();
        assert!(matches!(err, AnimationInferenceError::Cancelled));
    }
}
