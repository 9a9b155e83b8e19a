//! Google Gemini `generateContent` provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ChatProvider, ChatRequest, Credentials, Role};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";

/// Gemini has no system role in this API version; the prompt is sent as an
/// opening user turn followed by a short model acknowledgement.
const SYSTEM_ACK: &str = "Okay, I understand. How can I help?";

pub struct GeminiProvider {
    pub base_url: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(base_url: Option<&str>, model: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).into(),
            client: reqwest::Client::new(),
        }
    }

    fn contents(request: &ChatRequest) -> Vec<Content> {
        let mut contents = Vec::new();
        if let Some(system) = request.system_prompt() {
            contents.push(Content::new("user", system));
            contents.push(Content::new("model", SYSTEM_ACK));
        }
        contents.extend(request.dialogue().map(|m| {
            let role = if m.role == Role::Assistant { "model" } else { "user" };
            Content::new(role, &m.content)
        }));
        contents
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn new(role: &str, text: &str) -> Self {
        Self {
            role: role.into(),
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

fn reply_text(response: GenerateResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content.parts.into_iter().next())
        .map(|p| p.text)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest, credentials: &Credentials) -> anyhow::Result<String> {
        let api_key = credentials.require_key("gemini")?;
        let model = if request.model.is_empty() {
            &self.model
        } else {
            &request.model
        };
        let body = GenerateRequest {
            contents: Self::contents(request),
            generation_config: GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            },
        };
        debug!(model = %model, turns = body.contents.len(), "Sending Gemini generateContent");

        let resp = self
            .client
            .post(format!("{}/models/{model}:generateContent", self.base_url))
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {status}: {body}");
        }

        let parsed: GenerateResponse = resp.json().await?;
        reply_text(parsed).ok_or_else(|| anyhow::anyhow!("Invalid response structure from Gemini API"))
    }
}
