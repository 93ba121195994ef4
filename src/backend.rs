//! HTTP client for the Spare Cycles backend.
//!
//! [`ChatBackend`] is the seam between the session core and the outside
//! world: the real implementation talks to the backend's `/api/chat`,
//! `/api/models` and `/api/health` endpoints with `reqwest`, tests substitute
//! scripted fakes.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::streaming::{ChunkStream, HttpChunkStream};
use crate::types::{ChatError, ChatMessage, HealthStatus, ModelEntry};

/// Backend conversation endpoint as seen by the session core.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start a streaming chat completion for the given conversation. The
    /// returned source yields raw text fragments.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<Box<dyn ChunkStream>, ChatError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    model: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    error: String,
}

/// Real backend client.
pub struct HttpChatBackend {
    client: Client,
    base_url: String,
}

impl HttpChatBackend {
    pub fn default_base_url() -> String {
        "http://localhost:3000".to_string()
    }

    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// List the model identifiers the backend offers.
    pub async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        let response = self
            .client
            .get(self.url("/api/models"))
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Transport(format!(
                "model listing failed with status {status}"
            )));
        }

        let entries: Vec<ModelEntry> = response
            .json()
            .await
            .map_err(|e| ChatError::Parse(e.to_string()))?;

        Ok(entries.iter().map(|m| m.id().to_string()).collect())
    }

    /// Query the backend health endpoint. A 503 still carries a body, so a
    /// non-2xx status is not a transport error here.
    pub async fn health(&self) -> Result<HealthStatus, ChatError> {
        let response = self
            .client
            .get(self.url("/api/health"))
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let online = response.status().is_success();
        let mut health: HealthStatus = response
            .json()
            .await
            .map_err(|e| ChatError::Parse(e.to_string()))?;
        health.online = online;
        Ok(health)
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<Box<dyn ChunkStream>, ChatError> {
        debug!(model, turns = messages.len(), "starting chat request");

        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&ChatRequest { messages, model })
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Failure bodies are JSON `{"error": ...}`, fall back to the
            // status line when the body is something else
            let reason = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => format!("chat request failed with status {status}"),
            };
            return Err(ChatError::Transport(reason));
        }

        Ok(Box::new(HttpChunkStream::new(response)))
    }
}
