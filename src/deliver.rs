//! Outbound delivery: chat webhook notification and ticket resolution update.
//!
//! Delivery is best effort. An unreachable webhook or ticketing API is logged
//! and skipped; it never aborts a run, because the report itself has already
//! been produced and printed.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::config::DeliveryConfig;

#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Post a plain-text message. Returns Ok(false) when the sink is
    /// unconfigured and the message was skipped.
    async fn send_text(&self, text: &str) -> Result<bool>;
}

#[async_trait]
pub trait TicketSink: Send + Sync {
    /// Write the resolution text onto the configured ticket. Returns
    /// Ok(false) when no ticket is configured.
    async fn update_resolution(&self, content: &str) -> Result<bool>;
}

/// Incoming-webhook chat channel (Teams-style `{"text": ...}` payload).
pub struct WebhookChat {
    http: Client,
    webhook_url: String,
}

impl WebhookChat {
    pub fn new(cfg: &DeliveryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self { http, webhook_url: cfg.chat_webhook_url.clone() })
    }
}

#[async_trait]
impl ChatSink for WebhookChat {
    async fn send_text(&self, text: &str) -> Result<bool> {
        if self.webhook_url.is_empty() {
            info!("chat webhook unconfigured, skipping notification");
            return Ok(false);
        }

        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "chat webhook rejected the message");
            return Ok(false);
        }
        info!("chat notification delivered");
        Ok(true)
    }
}

/// ServiceDesk-style ticketing client: resolution updates go to
/// `PUT {base}/api/v3/requests/{id}` authenticated by a technician key header.
pub struct ServiceDeskTicket {
    http: Client,
    base_url: String,
    technician_key: String,
    request_id: String,
}

impl ServiceDeskTicket {
    pub fn new(cfg: &DeliveryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.ticket_url.trim_end_matches('/').to_string(),
            technician_key: cfg.technician_key.clone(),
            request_id: cfg.request_id.clone(),
        })
    }
}

#[async_trait]
impl TicketSink for ServiceDeskTicket {
    async fn update_resolution(&self, content: &str) -> Result<bool> {
        if self.base_url.is_empty() || self.technician_key.is_empty() || self.request_id.is_empty()
        {
            info!("ticketing unconfigured, skipping resolution update");
            return Ok(false);
        }

        let body = json!({ "request": { "resolution": { "content": content } } });
        let resp = self
            .http
            .put(format!("{}/api/v3/requests/{}", self.base_url, self.request_id))
            .header("TECHNICIAN_KEY", &self.technician_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), request_id = %self.request_id, "ticket update rejected");
            return Ok(false);
        }
        info!(request_id = %self.request_id, "ticket resolution updated");
        Ok(true)
    }
}

/// Deliver to both sinks, logging failures without propagating them.
pub async fn deliver_all(
    chat: Option<&dyn ChatSink>,
    ticket: Option<&dyn TicketSink>,
    chat_text: &str,
    resolution_md: &str,
) {
    if let Some(chat) = chat {
        if let Err(e) = chat.send_text(chat_text).await {
            warn!(error = %e, "chat delivery failed");
        }
    }
    if let Some(ticket) = ticket {
        if let Err(e) = ticket.update_resolution(resolution_md).await {
            warn!(error = %e, "ticket delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DeliveryConfig {
        DeliveryConfig::default()
    }

    #[tokio::test]
    async fn test_unconfigured_chat_skips() {
        let chat = WebhookChat::new(&cfg()).unwrap();
        assert!(!chat.send_text("hello").await.unwrap());
    }

    #[tokio::test]
    async fn test_unconfigured_ticket_skips() {
        let ticket = ServiceDeskTicket::new(&cfg()).unwrap();
        assert!(!ticket.update_resolution("resolved").await.unwrap());
    }

    #[tokio::test]
    async fn test_partially_configured_ticket_still_skips() {
        let mut c = cfg();
        c.ticket_url = "https://sdp.example".to_string();
        // technician key and request id still missing
        let ticket = ServiceDeskTicket::new(&c).unwrap();
        assert!(!ticket.update_resolution("resolved").await.unwrap());
    }

    struct FailingChat;

    #[async_trait]
    impl ChatSink for FailingChat {
        async fn send_text(&self, _text: &str) -> Result<bool> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_deliver_all_swallows_failures() {
        // Must complete despite the chat sink erroring.
        deliver_all(Some(&FailingChat), None, "summary", "resolution").await;
    }
}
