//! OpenAI Chat Completions API provider.
//!
//! Also serves DeepSeek and any self-hosted OpenAI-compatible endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ChatProvider, ChatRequest, Credentials, Role};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    OpenAi,
    DeepSeek,
    /// Self-hosted; the API key is optional.
    Custom,
}

pub struct OpenAiProvider {
    pub base_url: String,
    pub api_style: ApiStyle,
    provider_id: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    fn build(id: &str, style: ApiStyle, base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_style: style,
            provider_id: id.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn openai(base_url: Option<&str>, model: Option<&str>) -> Self {
        Self::build(
            "openai",
            ApiStyle::OpenAi,
            base_url.unwrap_or(OPENAI_BASE_URL),
            model.unwrap_or("gpt-4o"),
        )
    }

    pub fn deepseek(base_url: Option<&str>, model: Option<&str>) -> Self {
        Self::build(
            "deepseek",
            ApiStyle::DeepSeek,
            base_url.unwrap_or(DEEPSEEK_BASE_URL),
            model.unwrap_or("deepseek-chat"),
        )
    }

    pub fn custom(id: &str, base_url: Option<&str>, model: Option<&str>) -> Self {
        Self::build(
            id,
            ApiStyle::Custom,
            base_url.unwrap_or(OPENAI_BASE_URL),
            model.unwrap_or("gpt-4o"),
        )
    }

    fn body(&self, request: &ChatRequest) -> OpenAiRequest {
        let mut messages = Vec::new();
        if let Some(system) = request.system_prompt() {
            messages.push(OpenAiMessage {
                role: "system",
                content: system.to_string(),
            });
        }
        messages.extend(request.dialogue().map(|m| OpenAiMessage {
            role: match m.role {
                Role::Assistant => "assistant",
                _ => "user",
            },
            content: m.content.clone(),
        }));

        OpenAiRequest {
            model: if request.model.is_empty() {
                self.model.clone()
            } else {
                request.model.clone()
            },
            messages,
            max_tokens: request.max_tokens,
            stream: false,
            temperature: request.temperature,
        }
    }
}

// --- OpenAI request/response types ---

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn reply_text(completion: ChatCompletion) -> Option<String> {
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.is_empty())
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.provider_id
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest, credentials: &Credentials) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.body(request);
        debug!(provider = %self.provider_id, model = %body.model, messages = body.messages.len(), "Sending chat completion");

        let mut req = self.client.post(&url).json(&body);
        match (self.api_style, credentials.api_key()) {
            (_, Some(key)) => req = req.bearer_auth(key),
            (ApiStyle::Custom, None) => {}
            _ => anyhow::bail!("{} requires an API key", self.provider_id),
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("{} API error {status}: {body}", self.provider_id);
        }

        let completion: ChatCompletion = resp.json().await?;
        reply_text(completion)
            .ok_or_else(|| anyhow::anyhow!("Invalid response structure from {} API", self.provider_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;

    #[test]
    fn test_body_puts_system_first() {
        let provider = OpenAiProvider::deepseek(None, None);
        let req = ChatRequest::new(vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")])
            .with_system(Some("be brief"));
        let body = serde_json::to_value(provider.body(&req)).unwrap();

        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_request_model_overrides_default() {
        let provider = OpenAiProvider::openai(Some("http://localhost:1234/v1/"), None);
        assert_eq!(provider.base_url, "http://localhost:1234/v1");
        let mut req = ChatRequest::new(vec![ChatMessage::user("hi")]);
        req.model = "gpt-4o-mini".into();
        assert_eq!(provider.body(&req).model, "gpt-4o-mini");
    }

    #[test]
    fn test_reply_text_extraction() {
        let ok: ChatCompletion =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":"Hi!"}}]}"#).unwrap();
        assert_eq!(reply_text(ok).as_deref(), Some("Hi!"));

        let empty: ChatCompletion = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(reply_text(empty).is_none());
    }

    #[tokio::test]
    async fn test_missing_key_rejected_for_hosted_apis() {
        let provider = OpenAiProvider::openai(None, None);
        let req = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let err = provider.complete(&req, &Credentials::None).await.unwrap_err();
        assert!(err.to_string().contains("requires an API key"));
    }
}
