//! UptimeRobot-compatible client for monitor status-change logs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::cache::{cached, CacheStore};
use crate::config::UptimeRobotConfig;
use crate::sources::UptimeSource;

const GET_MONITORS_URL: &str = "https://api.uptimerobot.com/v2/getMonitors";

pub struct UptimeRobotClient {
    http: Client,
    api_key: String,
    cache: Arc<dyn CacheStore>,
    permits: Arc<Semaphore>,
    ttl_secs: i64,
}

impl UptimeRobotClient {
    pub fn new(
        cfg: &UptimeRobotConfig,
        cache: Arc<dyn CacheStore>,
        permits: Arc<Semaphore>,
        ttl_secs: i64,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key: cfg.api_key.clone(),
            cache,
            permits,
            ttl_secs,
        })
    }
}

#[async_trait]
impl UptimeSource for UptimeRobotClient {
    async fn list_monitors_with_logs(&self) -> Vec<Value> {
        if self.api_key.is_empty() {
            return Vec::new();
        }

        let key_payload = json!({ "endpoint": "getMonitors", "logs": 1 });
        let result = cached(self.cache.as_ref(), "upr", &key_payload, self.ttl_secs, || async {
            let _permit = match self.permits.acquire().await {
                Ok(p) => p,
                Err(_) => return json!({ "_error": "permit pool closed" }),
            };

            let form = [
                ("api_key", self.api_key.as_str()),
                ("format", "json"),
                ("logs", "1"),
            ];
            match self.http.post(GET_MONITORS_URL).form(&form).send().await {
                Ok(resp) => match resp.json::<Value>().await {
                    Ok(data) => data.get("monitors").cloned().unwrap_or(Value::Array(Vec::new())),
                    Err(e) => {
                        warn!(error = %e, "uptime source response was not JSON");
                        json!({ "_error": e.to_string() })
                    }
                },
                Err(e) => {
                    warn!(error = %e, "uptime source call failed");
                    json!({ "_error": e.to_string() })
                }
            }
        })
        .await;

        match result {
            Value::Array(monitors) => monitors,
            _ => Vec::new(),
        }
    }
}
