//! Completion and embedding service seams, plus an OpenAI-compatible client.
//!
//! Everything above this module talks to [`CompletionService`] and
//! [`EmbeddingService`] only, so tests swap in stubs and the HTTP details stay
//! here.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("request rejected with {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::RateLimited {
                message: body,
                retry_after,
            },
            500..=599 => Self::Server { status, body },
            _ => Self::Rejected { status, body },
        }
    }

    /// 429, 5xx, transport, and timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Transport(_) | Self::Timeout(_)
        )
    }

    /// Server-provided wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

// ── Requests ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A named, typed output contract the model is forced to fill.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool arguments.
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub tool: ToolSpec,
}

/// The tool-call argument string exactly as the model returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub arguments: String,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<RawResponse, ServiceError>;
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ServiceError>;
}

// ── OpenAI-compatible client ──

/// Client for `/chat/completions` and `/embeddings` on any OpenAI-compatible API.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// `base_url` like `https://api.openai.com/v1` (no trailing slash needed).
    pub fn new(base_url: &str, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ServiceError> {
        let url = format!("{}/{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), body, retry_after));
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

/// Seconds form of `Retry-After`; HTTP-date hints are ignored.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Request body with the tool forced via `tool_choice`.
pub fn completion_body(request: &CompletionRequest) -> Value {
    json!({
        "model": request.model,
        "messages": request.messages,
        "temperature": request.temperature,
        "tools": [{
            "type": "function",
            "function": {
                "name": request.tool.name,
                "description": request.tool.description,
                "parameters": request.tool.parameters,
            }
        }],
        "tool_choice": {
            "type": "function",
            "function": { "name": request.tool.name }
        }
    })
}

/// Pull the tool-call arguments out of a chat completion reply. Accepts the
/// current `tool_calls` shape and the legacy `function_call` one. A reply
/// that answers in plain text instead yields that text as the arguments, so
/// it fails schema parsing and gets healed like any malformed payload.
pub fn extract_arguments(reply: &Value) -> Result<RawResponse, ServiceError> {
    let message = reply
        .pointer("/choices/0/message")
        .ok_or_else(|| ServiceError::Decode("reply has no choices".into()))?;

    let tool_arguments = message
        .pointer("/tool_calls/0/function/arguments")
        .or_else(|| message.pointer("/function_call/arguments"))
        .and_then(Value::as_str);
    let arguments = match tool_arguments {
        Some(arguments) => arguments,
        None => {
            debug!("reply has no tool call, passing content on for healing");
            message.get("content").and_then(Value::as_str).unwrap_or_default()
        }
    };

    Ok(RawResponse {
        arguments: arguments.to_string(),
    })
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<RawResponse, ServiceError> {
        debug!(model = %request.model, tool = %request.tool.name, "chat completion");
        let reply = self
            .post("chat/completions", &completion_body(request))
            .await?;
        extract_arguments(&reply)
    }
}

#[async_trait]
impl EmbeddingService for OpenAiClient {
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ServiceError> {
        let reply = self
            .post("embeddings", &json!({ "model": model, "input": text }))
            .await?;
        let values = reply
            .pointer("/data/0/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| ServiceError::Decode("reply has no embedding".into()))?;
        values
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| ServiceError::Decode("non-numeric embedding value".into()))
            })
            .collect()
    }
}
