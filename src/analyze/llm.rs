// src/analyze/llm.rs
//! Chat-completions client abstraction.
//!
//! `OpenAiClient` does the real call; `DisabledClient` always refuses (the
//! analyzer then falls back to keywords); `MockClient` replays a canned reply
//! and records requests for tests and offline runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LlmConfig;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    pub detail: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn has_image(&self) -> bool {
        self.messages.iter().any(|m| match &m.content {
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|p| matches!(p, ContentPart::ImageUrl { .. })),
            MessageContent::Text(_) => false,
        })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("LLM disabled")]
    Disabled,
    #[error("no API key configured")]
    MissingKey,
    #[error("LLM API error: HTTP {0}")]
    Status(u16),
    #[error("LLM transport error: {0}")]
    Transport(String),
    #[error("LLM response not understood: {0}")]
    Decode(String),
    #[error("LLM returned no content")]
    EmptyReply,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Returns the assistant message text of the first choice.
    async fn complete(&self, api_key: &str, req: &ChatRequest) -> Result<String, LlmError>;

    fn provider_name(&self) -> &'static str;
}

pub type SharedLlm = Arc<dyn LlmClient>;

/// `LLM_TEST_MODE=disabled` gives a client that never calls out; anything
/// else builds the OpenAI-compatible client for `cfg.endpoint`.
pub fn build_client(cfg: &LlmConfig) -> anyhow::Result<SharedLlm> {
    let disabled = std::env::var("LLM_TEST_MODE")
        .map(|v| v.eq_ignore_ascii_case("disabled"))
        .unwrap_or(false);
    if disabled {
        return Ok(Arc::new(DisabledClient));
    }
    Ok(Arc::new(OpenAiClient::new(cfg)?))
}

pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
}

impl OpenAiClient {
    pub fn new(cfg: &LlmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("bet-scraper/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, api_key: &str, req: &ChatRequest) -> Result<String, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingKey);
        }

        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key.trim())
            .json(req)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or(LlmError::EmptyReply)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Refuses every call.
pub struct DisabledClient;

#[async_trait]
impl LlmClient for DisabledClient {
    async fn complete(&self, _api_key: &str, _req: &ChatRequest) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Canned reply; remembers every request it saw.
pub struct MockClient {
    reply: Result<String, LlmError>,
    seen: Mutex<Vec<ChatRequest>>,
}

impl MockClient {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            reply: Ok(text.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: LlmError) -> Self {
        Self {
            reply: Err(err),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        match self.seen.lock() {
            Ok(g) => g.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }
}

#[async_trait]
impl LlmClient for MockClient {
    async fn complete(&self, api_key: &str, req: &ChatRequest) -> Result<String, LlmError> {
        match self.seen.lock() {
            Ok(mut g) => g.push(req.clone()),
            Err(p) => p.into_inner().push(req.clone()),
        }
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingKey);
        }
        self.reply.clone()
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
