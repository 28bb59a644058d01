// LocalAgent Gate - Text Generation
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Fallback collaborator for prompts the dispatcher does not recognize.
// Speaks Ollama's non-streaming /api/chat. Bounded by the configured
// timeout; an empty reply counts as a failure.

use crate::config::LlmConfig;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation timed out after {0}s")]
    Timeout(u64),

    #[error("generation backend unreachable: {0}")]
    Transport(String),

    #[error("generation backend returned HTTP {0}")]
    Status(u16),

    #[error("generation backend returned an empty reply")]
    Empty,

    #[error("unreadable generation reply: {0}")]
    Parse(String),
}

/// Per-request sampling knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<String, GenerationError>;

    /// Model name reported in responses and metrics.
    fn model(&self) -> &str;
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    options: WireOptions,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct WireOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

fn payload<'a>(model: &'a str, prompt: &'a str, params: &SamplingParams) -> ChatPayload<'a> {
    ChatPayload {
        model,
        messages: vec![WireMessage { role: "user", content: prompt }],
        stream: false,
        options: WireOptions { temperature: params.temperature, num_predict: params.max_tokens },
    }
}

fn parse_reply(body: &str) -> Result<(String, u64), GenerationError> {
    let reply: ChatReply = serde_json::from_str(body).map_err(|e| GenerationError::Parse(e.to_string()))?;
    let text = reply.message.map(|m| m.content).unwrap_or_default();
    if text.trim().is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok((text, reply.eval_count))
}

// ============================================================================
// OLLAMA CLIENT
// ============================================================================

pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self, String> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
        Ok(Self::with_client(client, config, timeout))
    }

    fn with_client(client: Client, config: &LlmConfig, timeout: Duration) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout,
        }
    }
}

impl TextGenerator for OllamaClient {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<String, GenerationError> {
        let url = format!("{}/api/chat", self.base_url);
        log::info!("Generate request: model={}, temperature={}", self.model, params.temperature);
        log::debug!("POST {}", url);

        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                GenerationError::Timeout(self.timeout.as_secs())
            } else {
                GenerationError::Transport(e.to_string())
            }
        };

        let started = Instant::now();
        let resp = self
            .client
            .post(&url)
            .json(&payload(&self.model, prompt, params))
            .send()
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GenerationError::Status(status.as_u16()));
        }

        let body = resp.text().map_err(transport)?;
        let (text, tokens) = parse_reply(&body)?;
        log::info!(
            "Generate finished: {} tokens, {} chars in {:.2}s",
            tokens,
            text.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Test double: canned reply (or failure), records prompts.
#[cfg(test)]
pub(crate) struct StubGenerator {
    pub prompts: std::sync::Mutex<Vec<String>>,
    pub reply: Option<String>,
}

#[cfg(test)]
impl StubGenerator {
    pub fn replying(text: &str) -> Self {
        Self { prompts: std::sync::Mutex::new(Vec::new()), reply: Some(text.to_string()) }
    }

    pub fn failing() -> Self {
        Self { prompts: std::sync::Mutex::new(Vec::new()), reply: None }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl TextGenerator for StubGenerator {
    fn generate(&self, prompt: &str, _params: &SamplingParams) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().ok_or(GenerationError::Transport("stub offline".into()))
    }

    fn model(&self) -> &str {
        "stub-model"
    }
}

// ============================================================================
// TESTS
// ============================================================================
