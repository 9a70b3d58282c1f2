//! OpenAI-compatible chat-completions code generator.

use std::time::Duration;

use async_trait::async_trait;
use oracle_core::generator::{
    build_generation_prompt, extract_code, validate_generated_code, CodeGenerator,
    GenerationContext, GenerationError, SYSTEM_PROMPT,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{parse_setting, setting, Result};

/// Generator endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Base URL, e.g. `http://127.0.0.1:11434/v1`
    pub api_base: String,
    pub model: String,
    /// Bearer token (optional for local servers)
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:11434/v1".to_string(),
            model: "gemma3:4b".to_string(),
            api_key: None,
            temperature: 0.3,
            max_tokens: 2000,
            timeout_secs: 120,
        }
    }
}

impl GeneratorConfig {
    /// Create config from `AI_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(base) = setting(&lookup, "AI_API_BASE") {
            config.api_base = base;
        }
        if let Some(model) = setting(&lookup, "AI_MODEL") {
            config.model = model;
        }
        config.api_key = setting(&lookup, "AI_API_KEY");
        if let Some(t) = parse_setting(&lookup, "AI_TEMPERATURE")? {
            config.temperature = t;
        }
        if let Some(n) = parse_setting(&lookup, "AI_MAX_TOKENS")? {
            config.max_tokens = n;
        }
        if let Some(secs) = parse_setting(&lookup, "AI_TIMEOUT")? {
            config.timeout_secs = secs;
        }
        Ok(config)
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// [`CodeGenerator`] backed by a `/chat/completions` endpoint.
pub struct OpenAiGenerator {
    config: GeneratorConfig,
    http_client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("oracle-http/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GeneratorConfig::from_env()?)
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

#[async_trait]
impl CodeGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        task: &str,
        context: &GenerationContext,
    ) -> std::result::Result<String, GenerationError> {
        let prompt = build_generation_prompt(task, context);
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let mut request = self
            .http_client
            .post(self.config.completions_url())
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        debug!(model = %self.config.model, prompt_len = prompt.len(), "requesting script");
        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }

        let code = extract_code(&content);
        validate_generated_code(&code)?;
        Ok(code)
    }
}
