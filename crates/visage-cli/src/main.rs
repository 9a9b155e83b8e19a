use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use visage_core::config::Config;
use visage_media::capture::{CaptureOutput, TalkMode, VoiceCapture};
use visage_media::stt;
use visage_providers::{ChatMessage, ChatRequest, Credentials, ProviderRegistry};

mod logging;
mod simulate;
mod speak;

use speak::SpeakOptions;

#[derive(Parser)]
#[command(
    name = "visage",
    about = "Talking avatar pipeline: speech synthesis, facial animation, and lip-sync",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize speech and animate the avatar
    Speak {
        /// Text to speak
        #[arg(short, long)]
        text: String,

        /// Voice id (default: tts.default_voice)
        #[arg(long)]
        voice: Option<String>,

        /// Animation target (mark, claire, james)
        #[arg(long)]
        target: Option<String>,

        /// Drive a headless rig through playback
        #[arg(long)]
        simulate: bool,
    },

    /// Ask a chat provider, then speak the reply
    Chat {
        /// Message to send
        #[arg(short, long)]
        message: String,

        /// Provider id (default: models.default_provider)
        #[arg(long)]
        provider: Option<String>,

        /// Model to use
        #[arg(long)]
        model: Option<String>,

        /// Print the reply without speaking it
        #[arg(long)]
        no_speak: bool,

        #[arg(long)]
        target: Option<String>,

        #[arg(long)]
        simulate: bool,
    },

    /// Transcribe an audio file
    Transcribe {
        /// Audio file (wav, webm, mp3, ogg; .pcm/.raw for 16 kHz mono PCM)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);

    let mut config = Config::load(&config_path)?;
    logging::init(cli.verbose, &config.logging.clone().unwrap_or_default());
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Speak {
            text,
            voice,
            target,
            simulate,
        } => {
            speak::run(
                &config,
                &text,
                SpeakOptions {
                    voice,
                    target,
                    simulate,
                },
            )
            .await?;
        }
        Commands::Chat {
            message,
            provider,
            model,
            no_speak,
            target,
            simulate,
        } => {
            let reply = chat(&config, &message, provider.as_deref(), model).await?;
            println!("{reply}");
            if !no_speak {
                let opts = SpeakOptions {
                    voice: None,
                    target,
                    simulate,
                };
                speak::run(&config, &reply, opts).await?;
            }
        }
        Commands::Transcribe { file } => {
            let text = transcribe(&config, &file).await?;
            println!("{text}");
        }
        Commands::Status => {
            println!("Visage v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Audio dir: {}", config.audio_dir().display());
            let tts = config.tts();
            println!(
                "TTS: {} ({:?} mode, key {})",
                tts.provider,
                tts.mode,
                if tts.resolve_api_key().is_some() { "set" } else { "missing" }
            );
            if config.animation_enabled() {
                let animation = config.animation();
                println!(
                    "Animation: {} (default target {})",
                    animation.endpoint, animation.default_target
                );
            } else {
                println!("Animation: disabled (viseme or audio-only playback)");
            }
            let registry = ProviderRegistry::from_config(&config.models.clone().unwrap_or_default());
            println!(
                "Chat providers: {} (default {})",
                registry.ids().join(", "),
                registry.default_id()
            );
            println!("Transcription: {}", config.transcription().provider);
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Set { key, value } => {
                // Accept JSON literals; anything else is a string.
                let value = serde_json::from_str(&value)
                    .unwrap_or(serde_json::Value::String(value));
                config.set_path(&key, value)?;
                config.save(&config_path)?;
                println!("Set {key} in {}", config_path.display());
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s)", errors.len());
                }
                println!("Config OK ({} warning(s))", warnings.len());
            }
        },
    }

    Ok(())
}

async fn chat(
    config: &Config,
    message: &str,
    provider_id: Option<&str>,
    model: Option<String>,
) -> anyhow::Result<String> {
    let registry = ProviderRegistry::from_config(&config.models.clone().unwrap_or_default());
    let id = provider_id.unwrap_or(registry.default_id()).to_string();
    let provider = registry
        .get(&id)
        .ok_or_else(|| anyhow::anyhow!("Unknown provider '{id}' (configured: {})", registry.ids().join(", ")))?;

    let credentials = Credentials::from_key(config.provider(&id).and_then(|p| p.resolve_api_key()));
    let mut request =
        ChatRequest::new(vec![ChatMessage::user(message)]).with_system(config.system_prompt());
    request.model = model.unwrap_or_default();

    tracing::info!(provider = %id, model = %provider.default_model(), "Requesting chat reply");
    provider.complete(&request, &credentials).await
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
        "wav" => "audio/wav",
        "webm" => "audio/webm",
        "mp3" => "audio/mpeg",
        "ogg" | "opus" => "audio/ogg",
        "m4a" => "audio/mp4",
        _ => "application/octet-stream",
    }
}

fn is_raw_pcm(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("pcm") | Some("raw")
    )
}

async fn transcribe(config: &Config, file: &Path) -> anyhow::Result<String> {
    let audio = tokio::fs::read(file).await?;
    let transcription = config.transcription();

    if !is_raw_pcm(file) {
        return stt::transcribe_audio(audio, mime_for(file), &transcription).await;
    }

    // Raw PCM goes through the capture path so only the spoken part is sent.
    let (handle, mut rx) = VoiceCapture::start(TalkMode::Push);
    for chunk in audio.chunks(640) {
        handle.audio_tx.send(chunk.to_vec())?;
    }
    drop(handle);

    let mut utterance = None;
    while let Some(output) = rx.recv().await {
        match output {
            CaptureOutput::Utterance(u) => utterance = Some(u),
            CaptureOutput::Event(event) => tracing::debug!(?event, "Capture event"),
        }
    }
    match utterance {
        Some(u) => {
            tracing::info!(duration_ms = u.duration_ms, "Transcribing captured speech");
            stt::transcribe_pcm(&u.pcm_data, &transcription).await
        }
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_speak_args() {
        let cli = Cli::try_parse_from([
            "visage", "speak", "--text", "Hello", "--target", "james", "--simulate",
        ])
        .unwrap();
        match cli.command {
            Commands::Speak {
                text,
                target,
                simulate,
                voice,
            } => {
                assert_eq!(text, "Hello");
                assert_eq!(target.as_deref(), Some("james"));
                assert!(simulate);
                assert!(voice.is_none());
            }
            _ => panic!("expected speak"),
        }
    }

    #[test]
    fn test_audio_file_kinds() {
        assert_eq!(mime_for(Path::new("a.wav")), "audio/wav");
        assert_eq!(mime_for(Path::new("a.webm")), "audio/webm");
        assert_eq!(mime_for(Path::new("noext")), "application/octet-stream");
        assert!(is_raw_pcm(Path::new("mic.pcm")));
        assert!(!is_raw_pcm(Path::new("mic.wav")));
    }

    #[tokio::test]
    async fn test_silent_pcm_transcribes_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quiet.pcm");
        std::fs::write(&path, vec![0u8; 16_000]).unwrap();

        let text = transcribe(&Config::default(), &path).await.unwrap();
        assert!(text.is_empty());
    }
}
