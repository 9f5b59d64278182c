//! Zabbix JSON-RPC client with TTL caching and bounded concurrency.
//!
//! Every API call is cached under the `zbx` namespace and gated by the
//! incident permit pool. Transport failures and timeouts degrade to empty
//! results; an unconfigured client contributes nothing to the run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::{cached, CacheStore};
use crate::config::ZabbixConfig;
use crate::doc;
use crate::sources::{CandidateMetric, HostQuery, HostRef, IncidentSource, MetricSample};
use crate::timeparse;

/// Metric key families worth enriching. Matches are substring-based on the
/// item key, server-side (`searchByAny`).
const METRIC_KEY_FAMILIES: &[&str] = &[
    "cpu", "memory", "disk", "net", "vfs", "proc", "log", "service", "ping", "uptime", "docker",
    "kubernetes", "jmx",
];

pub struct ZabbixClient {
    http: Client,
    url: String,
    token: String,
    cache: Arc<dyn CacheStore>,
    permits: Arc<Semaphore>,
    ttl_secs: i64,
}

impl ZabbixClient {
    pub fn new(
        cfg: &ZabbixConfig,
        cache: Arc<dyn CacheStore>,
        permits: Arc<Semaphore>,
        ttl_secs: i64,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: cfg.url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            cache,
            permits,
            ttl_secs,
        })
    }

    fn configured(&self) -> bool {
        !self.url.is_empty() && !self.token.is_empty()
    }

    /// One cached JSON-RPC call. Returns the `result` member, or an error
    /// sentinel document the callers treat as empty.
    async fn api(&self, method: &str, params: Value) -> Value {
        if !self.configured() {
            return Value::Array(Vec::new());
        }

        let key_payload = json!({ "method": method, "params": params });
        cached(self.cache.as_ref(), "zbx", &key_payload, self.ttl_secs, || async {
            let _permit = match self.permits.acquire().await {
                Ok(p) => p,
                Err(_) => return json!({ "_error": "permit pool closed" }),
            };

            let body = json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "auth": self.token,
                "id": 1,
            });

            let resp = self
                .http
                .post(format!("{}/api_jsonrpc.php", self.url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(r) => match r.json::<Value>().await {
                    Ok(mut data) => match data.get_mut("result") {
                        Some(result) => result.take(),
                        None => {
                            warn!(method, "zabbix response carried no result");
                            json!({ "_error": data })
                        }
                    },
                    Err(e) => {
                        warn!(method, error = %e, "zabbix response was not JSON");
                        json!({ "_error": e.to_string() })
                    }
                },
                Err(e) => {
                    warn!(method, error = %e, "zabbix call failed");
                    json!({ "_error": e.to_string() })
                }
            }
        })
        .await
    }

    /// Same as `api`, coerced to a list; sentinel/object results become empty.
    async fn api_list(&self, method: &str, params: Value) -> Vec<Value> {
        match self.api(method, params).await {
            Value::Array(items) => items,
            _ => Vec::new(),
        }
    }

    async fn host_by_filter(&self, filter: Value) -> Option<HostRef> {
        let hosts = self
            .api_list(
                "host.get",
                json!({
                    "filter": filter,
                    "output": ["hostid", "host", "name", "status"],
                    "limit": 1,
                }),
            )
            .await;
        let host = hosts.first()?;
        Some(HostRef {
            host_id: doc::str_field(host, "hostid")?,
            hostname: doc::str_field(host, "host")
                .or_else(|| doc::str_field(host, "name"))
                .unwrap_or_default(),
        })
    }

    /// Event id -> trigger -> host, the last-resort resolution path.
    async fn host_by_event(&self, event_id: &str) -> Option<HostRef> {
        let events = self
            .api_list(
                "event.get",
                json!({
                    "eventids": [event_id],
                    "output": ["eventid", "objectid"],
                    "limit": 1,
                }),
            )
            .await;
        let trigger_id = doc::str_field(events.first()?, "objectid")?;

        let triggers = self
            .api_list(
                "trigger.get",
                json!({
                    "triggerids": [trigger_id],
                    "output": ["triggerid"],
                    "selectHosts": ["hostid", "host", "name", "status"],
                    "limit": 1,
                }),
            )
            .await;
        let host = doc::list_field(triggers.first()?, "hosts").first()?;
        Some(HostRef {
            host_id: doc::str_field(host, "hostid")?,
            hostname: doc::str_field(host, "host")
                .or_else(|| doc::str_field(host, "name"))
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl IncidentSource for ZabbixClient {
    async fn list_recent_problems(&self) -> Vec<Value> {
        self.api_list(
            "problem.get",
            json!({
                "recent": true,
                "sortfield": ["eventid"],
                "sortorder": "DESC",
                "limit": 100,
                "selectTags": "extend",
            }),
        )
        .await
    }

    async fn get_event_clock(&self, event_id: &str) -> Option<i64> {
        let events = self
            .api_list(
                "event.get",
                json!({
                    "eventids": [event_id],
                    "output": ["eventid", "clock"],
                    "limit": 1,
                }),
            )
            .await;
        events
            .first()
            .and_then(|ev| ev.get("clock"))
            .and_then(timeparse::parse_timestamp)
    }

    async fn resolve_host(&self, query: &HostQuery) -> Option<HostRef> {
        if let Some(hostname) = query.hostname.as_deref() {
            if let Some(host) = self.host_by_filter(json!({ "host": [hostname] })).await {
                debug!(hostname, host_id = %host.host_id, "host resolved by hostname");
                return Some(host);
            }
        }
        if let Some(ip) = query.ip.as_deref() {
            if let Some(host) = self.host_by_filter(json!({ "ip": [ip] })).await {
                debug!(ip, host_id = %host.host_id, "host resolved by ip");
                return Some(host);
            }
        }
        if let Some(event_id) = query.event_id.as_deref() {
            if let Some(host) = self.host_by_event(event_id).await {
                debug!(event_id, host_id = %host.host_id, "host resolved via trigger");
                return Some(host);
            }
        }
        None
    }

    async fn list_candidate_metrics(&self, host_id: &str, max: usize) -> Vec<CandidateMetric> {
        let items = self
            .api_list(
                "item.get",
                json!({
                    "hostids": [host_id],
                    "output": ["itemid", "name", "key_", "value_type", "units"],
                    "search": { "key_": METRIC_KEY_FAMILIES },
                    "searchByAny": true,
                    "sortfield": "name",
                    "limit": max,
                }),
            )
            .await;

        items
            .iter()
            .filter_map(|item| {
                Some(CandidateMetric {
                    item_id: doc::str_field(item, "itemid")?,
                    name: doc::str_field(item, "name").unwrap_or_default(),
                    key: doc::str_field(item, "key_").unwrap_or_default(),
                    value_type: doc::f64_field(item, "value_type").unwrap_or(0.0) as i64,
                    units: doc::str_field(item, "units").unwrap_or_default(),
                })
            })
            .take(max)
            .collect()
    }

    async fn get_metric_history(
        &self,
        item_id: &str,
        value_type: i64,
        from: i64,
        till: i64,
    ) -> Vec<MetricSample> {
        let rows = self
            .api_list(
                "history.get",
                json!({
                    "itemids": [item_id],
                    "history": value_type,
                    "time_from": from,
                    "time_till": till,
                    "output": "extend",
                    "sortfield": "clock",
                    "limit": 100,
                }),
            )
            .await;

        rows.iter()
            .filter_map(|row| {
                let ts = row.get("clock").and_then(timeparse::parse_timestamp)?;
                let value = doc::f64_field(row, "value")?;
                Some(MetricSample { ts, value })
            })
            .collect()
    }
}
