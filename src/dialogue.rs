//! HTTP client for the dialogue engine.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

use crate::config::EngineConfig;

/// One opaque reply object from the engine, e.g. `{"text": "..."}`.
pub type ReplyFragment = Map<String, Value>;

/// Build a plain text fragment.
pub fn text_fragment(text: impl Into<String>) -> ReplyFragment {
    let mut fragment = Map::new();
    fragment.insert("text".to_string(), Value::String(text.into()));
    fragment
}

/// The `text` member of a fragment, when it is a string.
pub fn fragment_text(fragment: &ReplyFragment) -> Option<&str> {
    fragment.get("text").and_then(Value::as_str)
}

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("dialogue engine unreachable: {0}")]
    UpstreamUnavailable(String),
}

#[derive(Debug, Serialize)]
struct EngineMessage<'a> {
    sender: &'a str,
    message: &'a str,
}

#[async_trait]
pub trait DialogueEngine: Send + Sync {
    /// Forward one user message and return the engine's reply fragments.
    async fn send(&self, sender: &str, message: &str) -> Result<Vec<ReplyFragment>, DialogueError>;

    /// Engine health document.
    async fn health(&self) -> Result<Value, DialogueError>;
}

/// Talks to a REST webhook channel.
pub struct HttpDialogueEngine {
    client: Client,
    webhook_url: String,
    health_url: String,
    timeout: Duration,
    health_timeout: Duration,
}

impl HttpDialogueEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, DialogueError> {
        let client = Client::builder()
            .build()
            .map_err(|e| DialogueError::UpstreamUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone(),
            health_url: config.health_url.clone(),
            timeout: config.timeout,
            health_timeout: config.health_timeout,
        })
    }
}

#[async_trait]
impl DialogueEngine for HttpDialogueEngine {
    async fn send(&self, sender: &str, message: &str) -> Result<Vec<ReplyFragment>, DialogueError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .timeout(self.timeout)
            .json(&EngineMessage { sender, message })
            .send()
            .await
            .map_err(|e| DialogueError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DialogueError::UpstreamUnavailable(format!(
                "webhook returned {}",
                status
            )));
        }

        let fragments: Vec<ReplyFragment> = response
            .json()
            .await
            .map_err(|e| DialogueError::UpstreamUnavailable(format!("invalid reply body: {}", e)))?;
        Ok(fragments)
    }

    async fn health(&self) -> Result<Value, DialogueError> {
        let response = self
            .client
            .get(&self.health_url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| DialogueError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DialogueError::UpstreamUnavailable(format!(
                "health check returned {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DialogueError::UpstreamUnavailable(format!("invalid health body: {}", e)))
    }
}
