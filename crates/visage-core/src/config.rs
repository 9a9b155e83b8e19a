//! Configuration loading, validation, and persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Visage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation: Option<AnimationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<AvatarConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- Speech synthesis ---

/// How synthesized audio and its timing metadata are fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// Audio and alignment arrive in separate JSON fields.
    #[default]
    Timestamps,
    /// Audio stream with metadata lines interleaved; demultiplexed client-side.
    Stream,
}

/// Text-to-speech (TTS) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// TTS provider (default: "elevenlabs").
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// API base URL (default: "https://api.elevenlabs.io").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Default voice ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_voice: Option<String>,

    /// Default model ID (e.g. "eleven_multilingual_v2").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Output format (default: "mp3_44100_128").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    #[serde(default)]
    pub mode: SynthesisMode,
}

fn default_tts_provider() -> String {
    "elevenlabs".into()
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            api_key: None,
            api_key_env: Some("ELEVENLABS_API_KEY".into()),
            base_url: None,
            default_voice: None,
            default_model: None,
            output_format: None,
            mode: SynthesisMode::default(),
        }
    }
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

// --- Facial animation inference ---

/// Streaming facial-animation inference service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// WebSocket endpoint of the inference service.
    #[serde(default = "default_animation_endpoint")]
    pub endpoint: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Avatar identities mapped to the service's function ids.
    #[serde(default = "default_animation_targets")]
    pub targets: HashMap<String, String>,

    /// Target used when the caller names none (default: "claire").
    #[serde(default = "default_animation_target")]
    pub default_target: String,

    /// Overall call timeout in ms (default: 30000).
    #[serde(default = "default_animation_timeout")]
    pub timeout_ms: u64,

    /// Size of each binary audio frame sent upstream (default: 32 KiB).
    #[serde(default = "default_animation_chunk_bytes")]
    pub chunk_bytes: usize,
}

fn default_true() -> bool {
    true
}

fn default_animation_endpoint() -> String {
    "wss://grpc.nvcf.nvidia.com/a2f/stream".into()
}

fn default_animation_targets() -> HashMap<String, String> {
    HashMap::from([
        ("mark".into(), "b85c53f3-5d18-4edf-8b12-875a400eb798".into()),
        ("claire".into(), "a05a5522-3059-4dfd-90e4-4bc1699ae9d4".into()),
        ("james".into(), "52f51a79-324c-4dbe-90ad-798ab665ad64".into()),
    ])
}

fn default_animation_target() -> String {
    "claire".into()
}

fn default_animation_timeout() -> u64 {
    30_000
}

fn default_animation_chunk_bytes() -> usize {
    32 * 1024
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_animation_endpoint(),
            api_key: None,
            api_key_env: Some("NVIDIA_A2F_API_KEY".into()),
            targets: default_animation_targets(),
            default_target: default_animation_target(),
            timeout_ms: default_animation_timeout(),
            chunk_bytes: default_animation_chunk_bytes(),
        }
    }
}

impl AnimationConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    /// Resolve a target name (or the default target) to its function id.
    ///
    /// Unknown names are passed through verbatim so raw ids also work.
    pub fn resolve_target(&self, name: Option<&str>) -> String {
        let name = name.unwrap_or(&self.default_target);
        self.targets
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

// --- Speech to text ---

/// Voice transcription (speech-to-text) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider: "deepgram", "openai" or "groq" (default: "deepgram").
    #[serde(default = "default_transcription_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "nova-2", "whisper-large-v3-turbo").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// BCP-47 language code (default: "en-US").
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_transcription_provider() -> String {
    "deepgram".into()
}

fn default_language() -> String {
    "en-US".into()
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            api_key: None,
            api_key_env: Some("DEEPGRAM_API_KEY".into()),
            model: None,
            language: default_language(),
        }
    }
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

// --- Chat providers ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderConfig>>,

    /// Provider id used when none is requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    /// Prepended to every conversation as the system message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Configuration for a single chat provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

// --- Avatar rendering ---

/// Avatar rig and animation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarConfig {
    #[serde(default = "default_idle_clip")]
    pub idle_clip: String,

    #[serde(default = "default_speaking_clip")]
    pub speaking_clip: String,

    /// Played when a requested clip is missing from the rig.
    #[serde(default = "default_fallback_clip")]
    pub fallback_clip: String,

    /// Meshes whose morph targets are driven.
    #[serde(default = "default_meshes")]
    pub meshes: Vec<String>,

    #[serde(default = "default_lip_sync_smoothing")]
    pub lip_sync_smoothing: f32,

    #[serde(default = "default_relax_smoothing")]
    pub relax_smoothing: f32,

    #[serde(default = "default_blink_smoothing")]
    pub blink_smoothing: f32,

    #[serde(default = "default_blink_min_ms")]
    pub blink_min_ms: u64,

    #[serde(default = "default_blink_max_ms")]
    pub blink_max_ms: u64,

    #[serde(default = "default_blink_closed_ms")]
    pub blink_closed_ms: u64,

    /// Render loop rate in Hz (default: 60).
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
}

fn default_idle_clip() -> String {
    "Idle".into()
}

fn default_speaking_clip() -> String {
    "Talking".into()
}

fn default_fallback_clip() -> String {
    "W_2".into()
}

fn default_meshes() -> Vec<String> {
    ["Wolf3D_Head", "EyeLeft", "EyeRight", "Wolf3D_Teeth"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_lip_sync_smoothing() -> f32 {
    0.5
}

fn default_relax_smoothing() -> f32 {
    0.2
}

fn default_blink_smoothing() -> f32 {
    0.5
}

fn default_blink_min_ms() -> u64 {
    1000
}

fn default_blink_max_ms() -> u64 {
    5000
}

fn default_blink_closed_ms() -> u64 {
    200
}

fn default_frame_rate() -> u32 {
    60
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            idle_clip: default_idle_clip(),
            speaking_clip: default_speaking_clip(),
            fallback_clip: default_fallback_clip(),
            meshes: default_meshes(),
            lip_sync_smoothing: default_lip_sync_smoothing(),
            relax_smoothing: default_relax_smoothing(),
            blink_smoothing: default_blink_smoothing(),
            blink_min_ms: default_blink_min_ms(),
            blink_max_ms: default_blink_max_ms(),
            blink_closed_ms: default_blink_closed_ms(),
            frame_rate: default_frame_rate(),
        }
    }
}

// --- Logging ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "visage_animation=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    direct
        .clone()
        .filter(|v| !v.is_empty())
        .or_else(|| {
            env_var
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
                .filter(|v| !v.is_empty())
        })
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VisageError::Io)?;

        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VisageError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Directory where synthesized clips and tracks are saved.
    pub fn audio_dir(&self) -> PathBuf {
        data_dir().join("audio")
    }

    /// TTS settings, falling back to defaults when the section is absent.
    pub fn tts(&self) -> TtsConfig {
        self.tts.clone().unwrap_or_default()
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn animation(&self) -> AnimationConfig {
        self.animation.clone().unwrap_or_default()
    }

    pub fn avatar(&self) -> AvatarConfig {
        self.avatar.clone().unwrap_or_default()
    }

    pub fn animation_enabled(&self) -> bool {
        self.animation.as_ref().is_some_and(|a| a.enabled)
    }

    /// Find a provider config by id.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.models
            .as_ref()
            .and_then(|m| m.providers.as_ref())
            .and_then(|p| p.iter().find(|pc| pc.id == id))
    }

    /// Id of the provider used when none is requested: the configured default, else the first.
    pub fn default_provider_id(&self) -> Option<String> {
        let models = self.models.as_ref()?;
        models.default_provider.clone().or_else(|| {
            models
                .providers
                .as_ref()
                .and_then(|p| p.first())
                .map(|p| p.id.clone())
        })
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.models.as_ref().and_then(|m| m.system_prompt.as_deref())
    }

    /// Get a config value by dotted path (e.g. "tts.default_voice", "avatar.frame_rate").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Set a config value by dotted path.
    pub fn set_path(&mut self, path: &str, value: serde_json::Value) -> anyhow::Result<()> {
        let mut json = serde_json::to_value(&*self)
            .map_err(|e| anyhow::anyhow!("Config serialization error: {e}"))?;

        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(anyhow::anyhow!("Empty path"));
        };

        let mut current = &mut json;
        for segment in parents {
            if current.get(*segment).is_none() {
                current[*segment] = serde_json::json!({});
            }
            current = current
                .get_mut(*segment)
                .ok_or_else(|| anyhow::anyhow!("Cannot descend into '{segment}'"))?;
        }

        current[*last] = value;

        *self = serde_json::from_value(json)
            .map_err(|e| anyhow::anyhow!("Config deserialization error: {e}"))?;
        Ok(())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.tts().resolve_api_key().is_none() {
            warnings.push("TTS has no API key configured".to_string());
        }

        if let Some(animation) = self.animation.as_ref().filter(|a| a.enabled) {
            if animation.resolve_api_key().is_none() {
                warnings.push("Animation inference has no API key configured".to_string());
            }
            if !animation.endpoint.starts_with("ws://") && !animation.endpoint.starts_with("wss://")
            {
                errors.push(format!(
                    "Animation endpoint must be a ws:// or wss:// URL: {}",
                    animation.endpoint
                ));
            }
            if animation.timeout_ms == 0 {
                errors.push("Animation timeout cannot be 0".to_string());
            }
        }

        if let Some(providers) = self.models.as_ref().and_then(|m| m.providers.as_ref()) {
            for p in providers {
                if p.id != "custom" && p.resolve_api_key().is_none() {
                    warnings.push(format!("Provider '{}' has no API key configured", p.id));
                }
            }
        }

        if let Some(avatar) = &self.avatar {
            if avatar.blink_min_ms > avatar.blink_max_ms {
                errors.push(format!(
                    "avatar.blink_min_ms ({}) exceeds avatar.blink_max_ms ({})",
                    avatar.blink_min_ms, avatar.blink_max_ms
                ));
            }
            if avatar.frame_rate == 0 {
                errors.push("avatar.frame_rate cannot be 0".to_string());
            }
            for (name, value) in [
                ("lip_sync_smoothing", avatar.lip_sync_smoothing),
                ("relax_smoothing", avatar.relax_smoothing),
                ("blink_smoothing", avatar.blink_smoothing),
            ] {
                if !(0.0..=1.0).contains(&value) {
                    errors.push(format!("avatar.{name} must be within 0..=1, got {value}"));
                }
            }
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for Visage data: `~/.visage/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".visage")
}
