//! Synthesized speech clips and their encoding.

use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sample encoding of an audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    Mp3,
    PcmS16le,
    Mulaw,
}

/// Audio format descriptor, as announced to the animation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub channels: u16,
    pub sample_rate: u32,
    pub bit_depth: u16,
}

impl AudioFormat {
    /// 16-bit little-endian mono PCM at the given rate.
    pub fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            encoding: AudioEncoding::PcmS16le,
            channels: 1,
            sample_rate,
            bit_depth: 16,
        }
    }

    /// Parse an ElevenLabs-style output format string (`mp3_44100_128`, `pcm_16000`, `ulaw_8000`).
    ///
    /// Unknown strings fall back to 44.1 kHz mp3.
    pub fn from_output_format(format: &str) -> Self {
        let mut parts = format.split('_');
        let codec = parts.next().unwrap_or_default();
        let sample_rate = parts
            .next()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(44_100);

        match codec {
            "pcm" => Self::pcm16_mono(sample_rate),
            "ulaw" => Self {
                encoding: AudioEncoding::Mulaw,
                channels: 1,
                sample_rate,
                bit_depth: 8,
            },
            _ => Self {
                encoding: AudioEncoding::Mp3,
                channels: 1,
                sample_rate,
                bit_depth: 16,
            },
        }
    }

    /// File extension for saving clips in this format.
    pub fn extension(&self) -> &'static str {
        match self.encoding {
            AudioEncoding::Mp3 => "mp3",
            AudioEncoding::PcmS16le => "pcm",
            AudioEncoding::Mulaw => "ulaw",
        }
    }

    /// MIME type of a clip in this format.
    pub fn mime_type(&self) -> &'static str {
        match self.encoding {
            AudioEncoding::Mp3 => "audio/mpeg",
            AudioEncoding::PcmS16le => "audio/l16",
            AudioEncoding::Mulaw => "audio/basic",
        }
    }
}

/// One synthesized speech clip. Never mutated, only replaced wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioArtifact {
    pub id: Uuid,
    pub bytes: Bytes,
    pub format: AudioFormat,
    /// Where the clip was saved for playback, if it was persisted.
    pub path: Option<PathBuf>,
}

impl AudioArtifact {
    pub fn new(bytes: impl Into<Bytes>, format: AudioFormat) -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes: bytes.into(),
            format,
            path: None,
        }
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Playback duration in seconds, when it can be derived from the byte count.
    ///
    /// Compressed formats return `None`.
    pub fn duration_secs(&self) -> Option<f64> {
        let bytes_per_frame = match self.format.encoding {
            AudioEncoding::Mp3 => return None,
            AudioEncoding::PcmS16le => 2 * self.format.channels as usize,
            AudioEncoding::Mulaw => self.format.channels as usize,
        };
        if bytes_per_frame == 0 || self.format.sample_rate == 0 {
            return None;
        }
        Some((self.bytes.len() / bytes_per_frame) as f64 / self.format.sample_rate as f64)
    }
}
