//! Energy-based voice activity detection over 16-bit PCM frames.

/// Edge reported by [`VoiceActivityDetector::process_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    SpeechStarted,
    SpeechEnded,
}

pub struct VoiceActivityDetector {
    threshold: f64,
    /// Loud frames in a row required before speech counts as started.
    min_speech_frames: usize,
    /// Quiet frames in a row required before speech counts as ended.
    min_silent_frames: usize,
    speech_active: bool,
    loud_count: usize,
    silent_count: usize,
}

impl VoiceActivityDetector {
    pub fn new(threshold: f64, min_speech_frames: usize, min_silent_frames: usize) -> Self {
        Self {
            threshold,
            min_speech_frames: min_speech_frames.max(1),
            min_silent_frames: min_silent_frames.max(1),
            speech_active: false,
            loud_count: 0,
            silent_count: 0,
        }
    }

    /// Defaults for 16 kHz audio in 20 ms frames: 60 ms to start, 600 ms to end.
    pub fn default_16khz() -> Self {
        Self::new(300.0, 3, 30)
    }

    /// RMS energy of a frame.
    pub fn rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    pub fn process_frame(&mut self, pcm: &[i16]) -> Option<VadTransition> {
        let is_speech = Self::rms(pcm) > self.threshold;

        if self.speech_active {
            if is_speech {
                self.silent_count = 0;
            } else {
                self.silent_count += 1;
                if self.silent_count >= self.min_silent_frames {
                    self.speech_active = false;
                    self.silent_count = 0;
                    return Some(VadTransition::SpeechEnded);
                }
            }
        } else if is_speech {
            self.loud_count += 1;
            if self.loud_count >= self.min_speech_frames {
                self.speech_active = true;
                self.loud_count = 0;
                return Some(VadTransition::SpeechStarted);
            }
        } else {
            self.loud_count = 0;
        }

        None
    }

    pub fn is_active(&self) -> bool {
        self.speech_active
    }

    pub fn reset(&mut self) {
        self.speech_active = false;
        self.loud_count = 0;
        self.silent_count = 0;
    }
}
