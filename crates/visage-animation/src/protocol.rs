//! Wire messages of the animation inference stream.
//!
//! The client sends a [`ClientMessage::SessionHeader`] text frame, the audio
//! as binary frames, then [`ClientMessage::EndOfAudio`]. The server answers
//! with text frames carrying [`ServerMessage`]s.

use serde::{Deserialize, Serialize};

use visage_core::{AudioFormat, Frame};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SessionHeader {
        session_id: String,
        target_id: String,
        audio_format: AudioFormat,
    },
    /// No more audio follows on this stream.
    EndOfAudio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once, before any frames: the blendshape order of every value vector.
    Header { names: Vec<String> },
    /// A batch of frames, appended to what was received so far.
    Frames { frames: Vec<Frame> },
    /// Terminal status. Code 0 is success.
    Status {
        code: i32,
        #[serde(default)]
        message: String,
    },
    Error { message: String },
}
