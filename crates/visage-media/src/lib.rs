//! Media pipeline: speech synthesis with viseme metadata, speech-to-text, voice capture.

pub mod capture;
pub mod demux;
pub mod stt;
pub mod tts;
pub mod vad;
pub mod visemes;

pub use tts::{ElevenLabsClient, SpeechSynthesizer, Synthesis};
