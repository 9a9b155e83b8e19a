//! Microphone capture: frames 16 kHz PCM, runs VAD, and cuts utterances.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::vad::{VadTransition, VoiceActivityDetector};

pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// No speech within this window ends the capture.
pub const INITIAL_SILENCE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TalkMode {
    /// The caller decides when the utterance ends (stop button).
    Push,
    /// Utterances end when the VAD reports silence.
    #[default]
    Vad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    SpeechStarted,
    SpeechEnded,
    /// Nothing was said before the initial-silence window ran out.
    InitialSilence,
}

/// A finished utterance: 16-bit mono PCM at [`CAPTURE_SAMPLE_RATE`].
#[derive(Debug, Clone)]
pub struct Utterance {
    pub pcm_data: Vec<i16>,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub enum CaptureOutput {
    Event(CaptureEvent),
    Utterance(Utterance),
}

pub struct CaptureHandle {
    /// Raw little-endian 16-bit PCM bytes.
    pub audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Stops the capture; in push mode the buffered audio is emitted first.
    pub cancel: CancellationToken,
    pub mode: TalkMode,
}

pub struct VoiceCapture {
    mode: TalkMode,
    vad: VoiceActivityDetector,
    /// Samples waiting for a full frame.
    pending: Vec<i16>,
    recorded: Vec<i16>,
    frame_size: usize,
    sample_rate: u32,
    elapsed_samples: u64,
    initial_silence_samples: u64,
    heard_speech: bool,
    timed_out: bool,
}

impl VoiceCapture {
    pub fn new(mode: TalkMode, sample_rate: u32) -> Self {
        Self::with_initial_silence(mode, sample_rate, INITIAL_SILENCE)
    }

    pub fn with_initial_silence(mode: TalkMode, sample_rate: u32, window: Duration) -> Self {
        Self {
            mode,
            vad: VoiceActivityDetector::default_16khz(),
            pending: Vec::new(),
            recorded: Vec::new(),
            frame_size: (sample_rate as usize / 50).max(1), // 20 ms
            sample_rate,
            elapsed_samples: 0,
            initial_silence_samples: (window.as_secs_f64() * sample_rate as f64) as u64,
            heard_speech: false,
            timed_out: false,
        }
    }

    pub fn mode(&self) -> TalkMode {
        self.mode
    }

    pub fn heard_speech(&self) -> bool {
        self.heard_speech
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Feed little-endian PCM bytes. A trailing odd byte is dropped.
    pub fn push_bytes(&mut self, raw: &[u8]) -> Vec<CaptureEvent> {
        let samples: Vec<i16> = raw
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.push_samples(&samples)
    }

    pub fn push_samples(&mut self, samples: &[i16]) -> Vec<CaptureEvent> {
        let mut events = Vec::new();
        if self.timed_out {
            return events;
        }
        self.pending.extend_from_slice(samples);

        while self.pending.len() >= self.frame_size {
            let frame: Vec<i16> = self.pending.drain(..self.frame_size).collect();
            self.elapsed_samples += frame.len() as u64;

            match self.vad.process_frame(&frame) {
                Some(VadTransition::SpeechStarted) => {
                    self.heard_speech = true;
                    events.push(CaptureEvent::SpeechStarted);
                }
                Some(VadTransition::SpeechEnded) => events.push(CaptureEvent::SpeechEnded),
                None => {}
            }
            self.recorded.extend_from_slice(&frame);

            if !self.heard_speech && self.elapsed_samples >= self.initial_silence_samples {
                debug!(elapsed_samples = self.elapsed_samples, "No speech in initial window");
                self.timed_out = true;
                self.recorded.clear();
                self.pending.clear();
                events.push(CaptureEvent::InitialSilence);
                break;
            }
        }

        events
    }

    /// Take the recorded audio as an utterance. Nothing is returned unless
    /// speech was heard.
    pub fn flush(&mut self) -> Option<Utterance> {
        self.recorded.append(&mut self.pending);
        let pcm_data = std::mem::take(&mut self.recorded);
        let heard = std::mem::replace(&mut self.heard_speech, false);
        self.vad.reset();

        if !heard || pcm_data.is_empty() {
            return None;
        }
        let duration_ms = (pcm_data.len() as u64 * 1000) / self.sample_rate as u64;
        Some(Utterance {
            pcm_data,
            duration_ms,
        })
    }

    /// Run a capture in a background task.
    pub fn start(mode: TalkMode) -> (CaptureHandle, mpsc::UnboundedReceiver<CaptureOutput>) {
        Self::start_with(Self::new(mode, CAPTURE_SAMPLE_RATE))
    }

    pub fn start_with(
        capture: VoiceCapture,
    ) -> (CaptureHandle, mpsc::UnboundedReceiver<CaptureOutput>) {
        let (audio_tx, audio_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<CaptureOutput>();
        let cancel = CancellationToken::new();
        let mode = capture.mode;

        let handle = CaptureHandle {
            audio_tx,
            cancel: cancel.clone(),
            mode,
        };

        tokio::spawn(async move {
            info!(?mode, "Voice capture started");
            capture.run(audio_rx, out_tx, cancel).await;
            info!("Voice capture ended");
        });

        (handle, out_rx)
    }

    async fn run(
        mut self,
        mut audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        out_tx: mpsc::UnboundedSender<CaptureOutput>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                raw = audio_rx.recv() => {
                    // Input closed: finish with whatever was heard.
                    let Some(raw) = raw else { break };
                    for event in self.push_bytes(&raw) {
                        let _ = out_tx.send(CaptureOutput::Event(event));
                        match event {
                            CaptureEvent::InitialSilence => return,
                            CaptureEvent::SpeechEnded if self.mode == TalkMode::Vad => {
                                if let Some(utterance) = self.flush() {
                                    let _ = out_tx.send(CaptureOutput::Utterance(utterance));
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        if let Some(utterance) = self.flush() {
            let _ = out_tx.send(CaptureOutput::Utterance(utterance));
        }
    }
}
