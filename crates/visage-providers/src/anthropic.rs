//! Anthropic Messages API provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ChatProvider, ChatRequest, Credentials, Role};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-opus-20240229";

pub struct AnthropicProvider {
    pub base_url: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(base_url: Option<&str>, model: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(ANTHROPIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).into(),
            client: reqwest::Client::new(),
        }
    }

    fn body(&self, request: &ChatRequest) -> MessagesRequest {
        MessagesRequest {
            model: if request.model.is_empty() {
                self.model.clone()
            } else {
                request.model.clone()
            },
            max_tokens: request.max_tokens,
            system: request.system_prompt().map(String::from),
            messages: request
                .dialogue()
                .map(|m| Message {
                    role: if m.role == Role::Assistant { "assistant" } else { "user" },
                    content: m.content.clone(),
                })
                .collect(),
            temperature: request.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

fn reply_text(response: MessagesResponse) -> Option<String> {
    let text: String = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect();
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest, credentials: &Credentials) -> anyhow::Result<String> {
        let api_key = credentials.require_key("anthropic")?;
        let body = self.body(request);
        debug!(model = %body.model, messages = body.messages.len(), "Sending Anthropic message");

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error {status}: {body}");
        }

        let parsed: MessagesResponse = resp.json().await?;
        reply_text(parsed).ok_or_else(|| anyhow::anyhow!("Invalid response structure from Anthropic API"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;

    #[test]
    fn test_system_is_a_separate_field() {
        let provider = AnthropicProvider::new(None, None);
        let req = ChatRequest::new(vec![
            crate::ChatMessage {
                role: Role::System,
                content: "persona".into(),
            },
            ChatMessage::user("hi"),
        ]);
        let body = serde_json::to_value(provider.body(&req)).unwrap();
        assert_eq!(body["system"], "persona");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["model"], DEFAULT_MODEL);
    }

    #[test]
    fn test_reply_joins_text_blocks() {
        let parsed: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Hello"},{"type":"tool_use","id":"x"},{"type":"text","text":" there"}]}"#,
        )
        .unwrap();
        assert_eq!(reply_text(parsed).as_deref(), Some("Hello there"));

        let empty: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert!(reply_text(empty).is_none());
    }
}
