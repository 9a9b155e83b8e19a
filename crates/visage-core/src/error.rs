use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisageError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VisageError>;

/// Failure to turn text into speech audio. Always terminal for the utterance.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Nothing to synthesize: text is empty")]
    EmptyText,

    #[error("No TTS API key configured")]
    MissingCredential,

    #[error("TTS provider rejected the credential ({status}): {body}")]
    CredentialRejected { status: u16, body: String },

    #[error("TTS provider error ({status}): {body}")]
    Provider { status: u16, body: String },

    #[error("TTS transport error: {0}")]
    Transport(String),

    #[error("TTS generation failed: no audio data received")]
    NoAudio,

    #[error("Malformed TTS response: {0}")]
    Malformed(String),
}

impl SynthesisError {
    /// Stable identifier of the failure cause, for logs and UI warnings.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyText => "empty_text",
            Self::MissingCredential => "missing_credential",
            Self::CredentialRejected { .. } => "credential_rejected",
            Self::Provider { .. } => "provider",
            Self::Transport(_) => "transport",
            Self::NoAudio => "no_audio",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// Failure of the facial animation inference call.
///
/// Never escapes the bridge's infallible entry point: callers fall back to
/// audio-only playback.
#[derive(Debug, Error)]
pub enum AnimationInferenceError {
    #[error("No animation inference API key configured")]
    MissingCredential,

    #[error("Animation service connect failed: {0}")]
    Connect(String),

    #[error("Animation stream transport error: {0}")]
    Transport(String),

    #[error("Animation inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("Animation inference cancelled")]
    Cancelled,

    #[error("Animation service reported an error: {0}")]
    Server(String),

    #[error("Malformed animation service message: {0}")]
    Malformed(String),

    #[error("Animation service returned no usable frames")]
    Empty,
}
