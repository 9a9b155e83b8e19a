//! Chat completion providers.
//!
//! Each provider implements [`ChatProvider`] to turn a conversation into one
//! reply. Replies are requested whole, not streamed: the text is handed to
//! speech synthesis in one piece.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use visage_core::config::{ModelsConfig, ProviderConfig};

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A request for one reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model id; the provider default when empty.
    #[serde(default)]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub system: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            model: String::new(),
            messages,
            max_tokens: 1024,
            temperature: None,
            system: None,
        }
    }

    pub fn with_system(mut self, system: Option<&str>) -> Self {
        self.system = system.filter(|s| !s.is_empty()).map(String::from);
        self
    }

    /// System prompt: the explicit field, else the first system message.
    pub fn system_prompt(&self) -> Option<&str> {
        self.system.as_deref().or_else(|| {
            self.messages
                .iter()
                .find(|m| m.role == Role::System)
                .map(|m| m.content.as_str())
        })
    }

    /// User and assistant turns only.
    pub fn dialogue(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }
}

/// Credentials for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credentials {
    #[serde(rename = "api_key")]
    ApiKey { api_key: String },
    /// Self-hosted endpoints that take no key.
    #[serde(rename = "none")]
    None,
}

impl Credentials {
    pub fn from_key(key: Option<String>) -> Self {
        match key.filter(|k| !k.is_empty()) {
            Some(api_key) => Self::ApiKey { api_key },
            None => Self::None,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        match self {
            Self::ApiKey { api_key } => Some(api_key),
            Self::None => None,
        }
    }

    pub(crate) fn require_key(&self, provider: &str) -> anyhow::Result<&str> {
        self.api_key()
            .ok_or_else(|| anyhow::anyhow!("{provider} requires an API key"))
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider identifier (e.g., "openai", "anthropic").
    fn id(&self) -> &str;

    fn default_model(&self) -> &str;

    async fn complete(&self, request: &ChatRequest, credentials: &Credentials) -> anyhow::Result<String>;
}

/// Build a provider for a configured id. Unknown ids are treated as
/// OpenAI-compatible endpoints at `base_url`.
pub fn provider_from_config(config: &ProviderConfig) -> Arc<dyn ChatProvider> {
    let base_url = config.base_url.as_deref();
    let model = config.default_model.as_deref();
    match config.id.as_str() {
        "anthropic" => Arc::new(AnthropicProvider::new(base_url, model)),
        "gemini" | "google" => Arc::new(GeminiProvider::new(base_url, model)),
        "deepseek" => Arc::new(OpenAiProvider::deepseek(base_url, model)),
        "openai" => Arc::new(OpenAiProvider::openai(base_url, model)),
        other => Arc::new(OpenAiProvider::custom(other, base_url, model)),
    }
}

/// Providers by id, with a default.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    default_id: String,
}

impl ProviderRegistry {
    pub fn new(default_id: String) -> Self {
        Self {
            providers: HashMap::new(),
            default_id,
        }
    }

    pub fn from_config(models: &ModelsConfig) -> Self {
        let configured = models.providers.as_deref().unwrap_or_default();
        let default_id = models
            .default_provider
            .clone()
            .or_else(|| configured.first().map(|p| p.id.clone()))
            .unwrap_or_else(|| "openai".into());

        let mut registry = Self::new(default_id);
        for provider in configured {
            registry.register(provider_from_config(provider));
        }
        if registry.get(&registry.default_id).is_none() {
            let fallback = ProviderConfig {
                id: registry.default_id.clone(),
                api_key_env: None,
                api_key: None,
                base_url: None,
                default_model: None,
            };
            registry.register(provider_from_config(&fallback));
        }
        debug!(providers = registry.providers.len(), default = %registry.default_id, "Chat providers registered");
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn ChatProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ChatProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn default_provider(&self) -> Option<Arc<dyn ChatProvider>> {
        self.get(&self.default_id)
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }
}
