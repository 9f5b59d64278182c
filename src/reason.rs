//! Reasoning-service client (OpenAI-compatible chat completions).
//!
//! The service is treated as an opaque text producer; JSON extraction and
//! repair happen in the pipeline, not here. Calls are gated by the reasoning
//! permit pool, which is usually a single permit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::ReasoningConfig;

#[derive(Debug, Error)]
pub enum ReasonError {
    #[error("reasoning service disabled: no API key configured")]
    Disabled,
    #[error("reasoning service timed out after {0}s")]
    Timeout(u64),
    #[error("reasoning service call failed: {0}")]
    Http(String),
    #[error("reasoning response carried no content")]
    EmptyResponse,
}

/// Opaque JSON-producing reasoning service.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Model identifier, part of every stage cache key.
    fn model(&self) -> &str;

    /// One completion: fixed system prompt plus a structured user payload.
    /// Returns the raw text response; no schema is enforced here.
    async fn complete(&self, system_prompt: &str, user_payload: &Value)
        -> Result<String, ReasonError>;
}

pub struct OpenAiCompatClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
    permits: Arc<Semaphore>,
}

impl OpenAiCompatClient {
    pub fn new(cfg: &ReasoningConfig, permits: Arc<Semaphore>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            timeout_secs: cfg.timeout_secs,
            permits,
        })
    }
}

#[async_trait]
impl ReasoningService for OpenAiCompatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_payload: &Value,
    ) -> Result<String, ReasonError> {
        if self.api_key.is_empty() {
            return Err(ReasonError::Disabled);
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ReasonError::Http("permit pool closed".to_string()))?;

        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_payload.to_string() },
            ],
        });

        debug!(model = %self.model, "dispatching reasoning call");
        let resp = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReasonError::Timeout(self.timeout_secs)
                } else {
                    ReasonError::Http(e.to_string())
                }
            })?;

        let data: Value = resp
            .json()
            .await
            .map_err(|e| ReasonError::Http(e.to_string()))?;

        let content = data
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ReasonError::EmptyResponse)?;

        Ok(content.to_string())
    }
}
