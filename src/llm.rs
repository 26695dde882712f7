//! Language-model abstraction.
//!
//! Every generation in the crate goes through [`LanguageModel::invoke`],
//! which takes a [`Prompt`] (optional system text plus alternating
//! messages) and returns the model's text. The seam lets the memory layer
//! decorate any model and lets tests substitute a scripted fake.
//!
//! [`AnthropicClient`] talks to the Messages API (`POST /v1/messages`) with
//! the same transient-error retry policy as the embedding providers.
//! [`VisionDescriber`] reuses that client to describe images for the
//! extractors.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LlmConfig, VisionConfig};
use crate::extract::ImageDescriber;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// A single model request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    /// Overrides the client's default output budget.
    pub max_tokens: Option<u32>,
    /// What session memory records and recalls for this call in place of
    /// the final user message. Never sent to the model.
    pub memory_key: Option<String>,
}

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.system = Some(text.into());
        self
    }

    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.messages.push(Message {
            role: Role::User,
            content: text.into(),
        });
        self
    }

    pub fn assistant(mut self, text: impl Into<String>) -> Self {
        self.messages.push(Message {
            role: Role::Assistant,
            content: text.into(),
        });
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn remember_as(mut self, key: impl Into<String>) -> Self {
        self.memory_key = Some(key.into());
        self
    }

    /// The memory key when set, else the final user message.
    pub fn memory_text(&self) -> Option<&str> {
        self.memory_key.as_deref().or_else(|| self.last_user_text())
    }

    /// Text of the final user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Put `block` ahead of any existing system text.
    pub fn prepend_system(&mut self, block: &str) {
        self.system = Some(match self.system.take() {
            Some(existing) => format!("{}\n\n{}", block, existing),
            None => block.to_string(),
        });
    }

    /// Total characters across system text and messages.
    pub fn char_len(&self) -> usize {
        self.system.as_ref().map_or(0, |s| s.len())
            + self.messages.iter().map(|m| m.content.len()).sum::<usize>()
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Whether calls can succeed at all (credentials present, provider enabled).
    fn is_available(&self) -> bool {
        true
    }

    async fn invoke(&self, prompt: &Prompt) -> Result<String>;
}

// ============ Disabled ============

/// Stands in when no model can be called; `reason` is surfaced on every call.
pub struct DisabledModel {
    reason: String,
}

impl DisabledModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn invoke(&self, _prompt: &Prompt) -> Result<String> {
        bail!("language model unavailable: {}", self.reason)
    }
}

// ============ Anthropic ============

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

impl AnthropicClient {
    /// Build a client from `[llm]`. Requires `ANTHROPIC_API_KEY`.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    async fn send(&self, body: &serde_json::Value) -> Result<String> {
        let endpoint = format!("{}/v1/messages", self.url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(attempt, ?delay, "retrying language model call");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_message_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    // 429, 5xx and 529 (overloaded) are transient
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("Anthropic API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("Anthropic API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("language model call failed after retries")))
    }
}

fn request_body(model: &str, default_max_tokens: u32, prompt: &Prompt) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "max_tokens": prompt.max_tokens.unwrap_or(default_max_tokens),
        "messages": prompt.messages,
    });
    if let Some(system) = &prompt.system {
        body["system"] = serde_json::Value::String(system.clone());
    }
    body
}

/// Concatenate the `text` blocks of a Messages API response.
fn parse_message_response(json: &serde_json::Value) -> Result<String> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid Anthropic response: missing content array"))?;

    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        bail!("Anthropic response contained no text");
    }
    Ok(text)
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, prompt: &Prompt) -> Result<String> {
        if prompt.messages.is_empty() {
            bail!("prompt has no messages");
        }
        tracing::debug!(chars = prompt.char_len(), model = %self.model, "invoking model");
        self.send(&request_body(&self.model, self.max_tokens, prompt))
            .await
    }
}

// ============ Vision ============

/// Image descriptions through the Messages API.
pub struct VisionDescriber {
    client: Arc<AnthropicClient>,
    model: String,
    max_tokens: u32,
}

impl VisionDescriber {
    pub fn new(client: Arc<AnthropicClient>, config: &VisionConfig) -> Self {
        let model = config.model.clone().unwrap_or_else(|| client.model.clone());
        Self {
            client,
            model,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl ImageDescriber for VisionDescriber {
    async fn describe(&self, image: &[u8], media_type: &str, instruction: &str) -> Result<String> {
        let data = base64::engine::general_purpose::STANDARD.encode(image);
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": { "type": "base64", "media_type": media_type, "data": data }
                    },
                    { "type": "text", "text": instruction }
                ]
            }]
        });
        self.client.send(&body).await
    }
}

/// The configured model, or a [`DisabledModel`] explaining why none is
/// available. Never fails on a missing key so commands that do not
/// generate text keep working.
pub fn create_model(config: &LlmConfig) -> Arc<dyn LanguageModel> {
    if !config.is_enabled() {
        return Arc::new(DisabledModel::new("[llm].provider is \"disabled\""));
    }
    match AnthropicClient::new(config) {
        Ok(client) => Arc::new(client),
        Err(e) => Arc::new(DisabledModel::new(e.to_string())),
    }
}

/// The configured image describer, if vision is enabled and credentials
/// are present.
pub fn create_describer(
    llm: &LlmConfig,
    vision: &VisionConfig,
) -> Option<Arc<dyn ImageDescriber>> {
    if !vision.enabled || !llm.is_enabled() {
        return None;
    }
    match AnthropicClient::new(llm) {
        Ok(client) => Some(Arc::new(VisionDescriber::new(Arc::new(client), vision))),
        Err(e) => {
            tracing::warn!("image descriptions disabled: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_includes_system_when_set() {
        let prompt = Prompt::new().system("be brief").user("hello").max_tokens(100);
        let body = request_body("m", 4096, &prompt);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
    }

    #[test]
    fn test_request_body_defaults_max_tokens() {
        let body = request_body("m", 4096, &Prompt::new().user("x"));
        assert_eq!(body["max_tokens"], 4096);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_parse_message_response_joins_text_blocks() {
        let json = serde_json::json!({
            "content": [
                {"type": "text", "text": "Hello, "},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "world"}
            ]
        });
        assert_eq!(parse_message_response(&json).unwrap(), "Hello, world");
    }

    #[test]
    fn test_parse_message_response_rejects_empty() {
        let json = serde_json::json!({ "content": [] });
        assert!(parse_message_response(&json).is_err());
    }

    #[test]
    fn test_prepend_system_keeps_existing_text() {
        let mut prompt = Prompt::new().system("base");
        prompt.prepend_system("memory");
        assert_eq!(prompt.system.as_deref(), Some("memory\n\nbase"));
        assert_eq!(Prompt::new().user("a").assistant("b").user("c").last_user_text(), Some("c"));
    }

    #[tokio::test]
    async fn test_disabled_model_reports_reason() {
        let model = create_model(&LlmConfig {
            provider: "disabled".into(),
            ..LlmConfig::default()
        });
        assert!(!model.is_available());
        let err = model.invoke(&Prompt::new().user("hi")).await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }
}
