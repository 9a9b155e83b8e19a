//! Synthesis client tests against a local TTS double.
//!
//! Run with: `cargo test -p visage-media --test integration`

use axum::Router;
use axum::body::Body;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use base64::Engine;
use serde_json::json;

use visage_core::config::{SynthesisMode, TtsConfig};
use visage_core::error::SynthesisError;
use visage_media::{ElevenLabsClient, SpeechSynthesizer};

const AUDIO: &[u8] = b"\xff\xfb\x90\x44fake-mp3-frames\n\x00\x01\x02";
const VISEME_LINE: &str = r#"{"visemes":[{"viseme":"PP","start":0.0,"end":0.1},{"viseme":"aa","start":0.1,"end":0.3}]}"#;

fn rejected(headers: &HeaderMap) -> Option<Response> {
    match headers.get("xi-api-key").and_then(|v| v.to_str().ok()) {
        Some("good-key") => None,
        _ => Some((StatusCode::UNAUTHORIZED, r#"{"detail":"invalid_api_key"}"#).into_response()),
    }
}

async fn stream_handler(Path(voice): Path<String>, headers: HeaderMap) -> Response {
    if let Some(resp) = rejected(&headers) {
        return resp;
    }
    match voice.as_str() {
        "silent" => Body::empty().into_response(),
        "plain" => AUDIO.to_vec().into_response(),
        "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response(),
        _ => {
            let mut body = AUDIO[..8].to_vec();
            body.push(b'\n');
            body.extend_from_slice(VISEME_LINE.as_bytes());
            body.push(b'\n');
            body.extend_from_slice(&AUDIO[8..]);
            body.into_response()
        }
    }
}

async fn timestamps_handler(Path(voice): Path<String>, headers: HeaderMap) -> Response {
    if let Some(resp) = rejected(&headers) {
        return resp;
    }
    let audio_base64 = base64::engine::general_purpose::STANDARD.encode(AUDIO);
    let body = match voice.as_str() {
        "garbled" => json!({"audio_base64": "***not base64***"}),
        "no-alignment" => json!({"audio_base64": audio_base64}),
        _ => json!({
            "audio_base64": audio_base64,
            "alignment": {
                "characters": ["h", "i", "!"],
                "character_start_times_seconds": [0.0, 0.1, 0.2],
                "character_end_times_seconds": [0.1, 0.2, 0.3]
            }
        }),
    };
    axum::Json(body).into_response()
}

async fn start_tts_double() -> String {
    let app = Router::new()
        .route("/v1/text-to-speech/{voice}/stream", post(stream_handler))
        .route(
            "/v1/text-to-speech/{voice}/with-timestamps",
            post(timestamps_handler),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn client(mode: SynthesisMode) -> ElevenLabsClient {
    let base_url = start_tts_double().await;
    ElevenLabsClient::new(&TtsConfig {
        base_url: Some(base_url),
        mode,
        ..TtsConfig::default()
    })
}

#[tokio::test]
async fn test_stream_splits_audio_and_visemes() {
    let client = client(SynthesisMode::Stream).await;
    let out = client.synthesize("hello", "rachel", "good-key").await.unwrap();

    assert_eq!(out.audio.bytes.as_ref(), AUDIO);
    let visemes = out.visemes.expect("viseme metadata");
    assert_eq!(visemes.cues().len(), 2);
}

#[tokio::test]
async fn test_stream_without_metadata_is_audio_only() {
    let client = client(SynthesisMode::Stream).await;
    let out = client.synthesize("hello", "plain", "good-key").await.unwrap();
    assert_eq!(out.audio.bytes.as_ref(), AUDIO);
    assert!(out.visemes.is_none());
}

#[tokio::test]
async fn test_rejected_credential() {
    let client = client(SynthesisMode::Stream).await;
    let err = client.synthesize("hello", "rachel", "bad-key").await.unwrap_err();
    match err {
        SynthesisError::CredentialRejected { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("invalid_api_key"));
        }
        other => panic!("expected CredentialRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_provider_failure_is_distinct() {
    let client = client(SynthesisMode::Stream).await;
    let err = client.synthesize("hello", "broken", "good-key").await.unwrap_err();
    assert!(matches!(err, SynthesisError::Provider { status: 500, .. }));
}

#[tokio::test]
async fn test_empty_body_is_no_audio() {
    let client = client(SynthesisMode::Stream).await;
    let err = client.synthesize("hello", "silent", "good-key").await.unwrap_err();
    assert!(matches!(err, SynthesisError::NoAudio));
}

#[tokio::test]
async fn test_timestamps_decode_audio_and_alignment() {
    let client = client(SynthesisMode::Timestamps).await;
    let out = client.synthesize("hi!", "rachel", "good-key").await.unwrap();

    assert_eq!(out.audio.bytes.as_ref(), AUDIO);
    let cues = out.visemes.expect("alignment visemes").cues();
    let labels: Vec<_> = cues.iter().filter_map(|c| c.label()).collect();
    assert_eq!(labels, vec!["aa", "I", "sil"]);
}

#[tokio::test]
async fn test_timestamps_without_alignment() {
    let client = client(SynthesisMode::Timestamps).await;
    let out = client.synthesize("hi", "no-alignment", "good-key").await.unwrap();
    assert!(!out.audio.is_empty());
    assert!(out.visemes.is_none());
}

#[tokio::test]
async fn test_timestamps_bad_base64_is_malformed() {
    let client = client(SynthesisMode::Timestamps).await;
    let err = client.synthesize("hi", "garbled", "good-key").await.unwrap_err();
    assert!(matches!(err, SynthesisError::Malformed(_)));
}

#[tokio::test]
async fn test_unreachable_provider_is_transport_error() {
    let client = ElevenLabsClient::new(&TtsConfig {
        base_url: Some("http://127.0.0.1:9".into()),
        mode: SynthesisMode::Stream,
        ..TtsConfig::default()
    });
    let err = client.synthesize("hello", "rachel", "good-key").await.unwrap_err();
    assert!(matches!(err, SynthesisError::Transport(_)));
}
