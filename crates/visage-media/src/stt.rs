//! Speech-to-text for recorded user audio.

use anyhow::Result;
use serde::Deserialize;
use tracing::debug;

use visage_core::config::TranscriptionConfig;

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    const BITS_PER_SAMPLE: u16 = 16;
    let data_len = pcm.len() * 2;
    let byte_rate = sample_rate * channels as u32 * BITS_PER_SAMPLE as u32 / 8;
    let block_align = channels * BITS_PER_SAMPLE / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

/// Get the transcription API URL for a given provider.
pub fn provider_url(config: &TranscriptionConfig) -> String {
    match config.provider.as_str() {
        "openai" => "https://api.openai.com/v1/audio/transcriptions".into(),
        "groq" => "https://api.groq.com/openai/v1/audio/transcriptions".into(),
        _ => format!(
            "https://api.deepgram.com/v1/listen?model={}&language={}&smart_format=true",
            default_model(config),
            config.language
        ),
    }
}

fn default_model(config: &TranscriptionConfig) -> &str {
    config
        .model
        .as_deref()
        .unwrap_or(match config.provider.as_str() {
            "openai" => "whisper-1",
            "groq" => "whisper-large-v3-turbo",
            _ => "nova-2",
        })
}

#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    results: Option<DeepgramResults>,
}

#[derive(Debug, Deserialize)]
struct DeepgramResults {
    #[serde(default)]
    channels: Vec<DeepgramChannel>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    #[serde(default)]
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    #[serde(default)]
    transcript: String,
}

/// Extract the best transcript per channel, joined by newlines. Missing results yield "".
fn deepgram_transcript(body: &str) -> Result<String> {
    let parsed: DeepgramResponse = serde_json::from_str(body)?;
    let text = parsed
        .results
        .map(|r| {
            r.channels
                .into_iter()
                .filter_map(|c| c.alternatives.into_iter().next())
                .map(|a| a.transcript)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    Ok(text)
}

/// Transcribe an encoded audio clip (webm/opus, wav, ...) with the configured provider.
pub async fn transcribe_audio(
    audio: Vec<u8>,
    mime_type: &str,
    config: &TranscriptionConfig,
) -> Result<String> {
    let api_key = config
        .resolve_api_key()
        .ok_or_else(|| anyhow::anyhow!("No transcription API key configured"))?;

    let url = provider_url(config);
    debug!(url, provider = %config.provider, audio_bytes = audio.len(), "Sending audio for transcription");

    let client = reqwest::Client::new();
    let resp = match config.provider.as_str() {
        "openai" | "groq" => {
            let part = reqwest::multipart::Part::bytes(audio)
                .file_name("audio.wav")
                .mime_str(mime_type)?;
            let mut form = reqwest::multipart::Form::new()
                .text("model", default_model(config).to_string())
                .text("response_format", "text")
                .part("file", part);
            if let Some(lang) = config.language.split('-').next().filter(|l| !l.is_empty()) {
                form = form.text("language", lang.to_string());
            }
            client
                .post(&url)
                .header("Authorization", format!("Bearer {api_key}"))
                .multipart(form)
                .send()
                .await?
        }
        _ => {
            client
                .post(&url)
                .header("Authorization", format!("Token {api_key}"))
                .header("Content-Type", mime_type)
                .body(audio)
                .send()
                .await?
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Transcription API error {status}: {body}");
    }

    let body = resp.text().await?;
    let text = match config.provider.as_str() {
        "openai" | "groq" => body,
        _ => deepgram_transcript(&body)?,
    };
    Ok(text.trim().to_string())
}

/// Transcribe raw 16 kHz mono PCM, wrapping it as WAV first.
pub async fn transcribe_pcm(pcm: &[i16], config: &TranscriptionConfig) -> Result<String> {
    let wav = pcm_to_wav(pcm, 16_000, 1);
    transcribe_audio(wav, "audio/wav", config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_pcm_wraps_as_wav() {
        // 250 ms of capture audio with a recognisable first sample.
        let mut pcm = vec![0i16; 4000];
        pcm[0] = -2;
        let wav = pcm_to_wav(&pcm, 16_000, 1);

        assert_eq!(wav.len(), 44 + pcm.len() * 2);
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[36..40], b"data");
        let byte_rate = u32::from_le_bytes(wav[28..32].try_into().unwrap());
        assert_eq!(byte_rate, 32_000);
        let data_len = u32::from_le_bytes(wav[40..44].try_into().unwrap());
        assert_eq!(data_len as usize, pcm.len() * 2);
        assert_eq!(i16::from_le_bytes([wav[44], wav[45]]), -2);
    }

    #[test]
    fn test_provider_url_selection() {
        let deepgram = TranscriptionConfig::default();
        let url = provider_url(&deepgram);
        assert!(url.contains("deepgram.com"));
        assert!(url.contains("model=nova-2"));
        assert!(url.contains("language=en-US"));

        let openai = TranscriptionConfig {
            provider: "openai".into(),
            ..TranscriptionConfig::default()
        };
        assert!(provider_url(&openai).contains("openai.com"));
        assert_eq!(default_model(&openai), "whisper-1");

        let groq = TranscriptionConfig {
            provider: "groq".into(),
            model: Some("distil-whisper".into()),
            ..TranscriptionConfig::default()
        };
        assert!(provider_url(&groq).contains("groq.com"));
        assert_eq!(default_model(&groq), "distil-whisper");
    }

    #[test]
    fn test_deepgram_transcript_parsing() {
        let body = r#"{"results":{"channels":[{"alternatives":[{"transcript":"hello there"},{"transcript":"hollow there"}]}]}}"#;
        assert_eq!(deepgram_transcript(body).unwrap(), "hello there");

        let empty = r#"{"results":{"channels":[{"alternatives":[]}]}}"#;
        assert_eq!(deepgram_transcript(empty).unwrap(), "");

        assert_eq!(deepgram_transcript(r#"{}"#).unwrap(), "");
        assert!(deepgram_transcript("not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_key_errors() {
        let config = TranscriptionConfig {
            api_key_env: Some("VISAGE_TEST_UNSET_STT_KEY".into()),
            ..TranscriptionConfig::default()
        };
        let err = transcribe_audio(vec![1, 2, 3], "audio/webm", &config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No transcription API key"));
    }
}
