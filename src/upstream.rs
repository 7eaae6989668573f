// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

// Upstream model backend boundary
//
// Abstraction over the token-generating backend. The relay session only
// ever sees `UpstreamClient`; the production implementation speaks the
// Ollama HTTP API (NDJSON streaming), and tests inject in-memory doubles.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::pin::Pin;

/// Byte stream returned by an opened upstream connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors crossing the backend boundary.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("cannot reach model backend at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("model backend request timed out: {0}")]
    Timeout(String),

    #[error("model backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model backend transport error: {0}")]
    Transport(String),
}

fn map_reqwest_error(error: reqwest::Error, url: &str) -> UpstreamError {
    if error.is_connect() {
        return UpstreamError::Unreachable {
            url: url.to_string(),
            reason: error.to_string(),
        };
    }
    if error.is_timeout() {
        return UpstreamError::Timeout(error.to_string());
    }
    UpstreamError::Transport(error.to_string())
}

// ---------------------------------------------------------------------------
// Chat turn
// ---------------------------------------------------------------------------

/// One message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// The outbound request for one relay session: model, sampling temperature,
/// and the conversation (history plus the new user prompt).
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub model: String,
    pub temperature: f64,
    pub messages: Vec<ChatMessage>,
}

impl ChatTurn {
    /// Build a turn from prior history and a new user prompt.
    ///
    /// History entries missing a role or content are dropped rather than
    /// forwarded; backends reject them wholesale.
    pub fn new(
        model: impl Into<String>,
        temperature: f64,
        history: Vec<ChatMessage>,
        prompt: &str,
    ) -> Self {
        let mut messages: Vec<ChatMessage> = history
            .into_iter()
            .filter(|m| !m.role.is_empty() && !m.content.is_empty())
            .collect();
        messages.push(ChatMessage::new("user", prompt));

        Self {
            model: model.into(),
            temperature,
            messages,
        }
    }

    /// Flatten the conversation into a single role-prefixed prompt for
    /// generate-style endpoints that take no message array.
    pub fn flattened_prompt(&self) -> String {
        let mut prompt = self
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push_str("\nassistant:");
        prompt
    }

    /// Completion-only model families are served by `/api/generate`;
    /// everything else goes through `/api/chat`.
    fn wants_generate(&self) -> bool {
        let model = self.model.to_ascii_lowercase();
        model.starts_with("gpt-oss")
    }
}

// ---------------------------------------------------------------------------
// Trait: UpstreamClient (dependency injection point)
// ---------------------------------------------------------------------------

/// Abstraction over the model backend.
///
/// Implementations must be Send + Sync so they can be shared across request
/// handlers via `Arc`.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Lightweight liveness probe, run before committing to a streaming call.
    async fn health(&self) -> Result<(), UpstreamError>;

    /// Open the NDJSON token stream for one turn.
    async fn open_stream(&self, turn: &ChatTurn) -> Result<ByteStream, UpstreamError>;
}

// ---------------------------------------------------------------------------
// Ollama implementation
// ---------------------------------------------------------------------------

/// Production backend client speaking the Ollama HTTP API.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl UpstreamClient for OllamaClient {
    async fn health(&self) -> Result<(), UpstreamError> {
        let url = format!("{}/api/version", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &url))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(UpstreamError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn open_stream(&self, turn: &ChatTurn) -> Result<ByteStream, UpstreamError> {
        let (url, body) = if turn.wants_generate() {
            (
                format!("{}/api/generate", self.base_url),
                json!({
                    "model": turn.model,
                    "prompt": turn.flattened_prompt(),
                    "stream": true,
                    "options": { "temperature": turn.temperature },
                }),
            )
        } else {
            (
                format!("{}/api/chat", self.base_url),
                json!({
                    "model": turn.model,
                    "messages": turn.messages,
                    "stream": true,
                    "options": { "temperature": turn.temperature },
                }),
            )
        };

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/x-ndjson")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let stream_url = url.clone();
        let stream = response
            .bytes_stream()
            .map(move |item| item.map_err(|e| map_reqwest_error(e, &stream_url)));
        Ok(Box::pin(stream))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
