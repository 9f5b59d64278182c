//! Monitoring-source contracts.
//!
//! The pipeline talks to its upstreams through these traits so tests and
//! demo runs can substitute in-process fakes. "Not found" is an `Option`,
//! never an error: a missing host or event degrades the run, it does not
//! abort it.

pub mod uptimerobot;
pub mod zabbix;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::config::ConcurrencyConfig;

/// The three independent permit pools for upstream calls.
///
/// Metric-history fetches inside the enricher share the incident pool; the
/// reasoning pool is typically a single permit.
#[derive(Clone)]
pub struct Limits {
    pub incident: Arc<Semaphore>,
    pub uptime: Arc<Semaphore>,
    pub reasoning: Arc<Semaphore>,
}

impl Limits {
    pub fn from_config(cfg: &ConcurrencyConfig) -> Self {
        Self {
            incident: Arc::new(Semaphore::new(cfg.incident.max(1))),
            uptime: Arc::new(Semaphore::new(cfg.uptime.max(1))),
            reasoning: Arc::new(Semaphore::new(cfg.reasoning.max(1))),
        }
    }
}

/// How the enricher identifies the affected host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostQuery {
    pub hostname: Option<String>,
    pub ip: Option<String>,
    pub event_id: Option<String>,
}

/// A resolved host on the incident source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRef {
    pub host_id: String,
    pub hostname: String,
}

/// A candidate metric item on a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMetric {
    pub item_id: String,
    pub name: String,
    pub key: String,
    /// Source-side value type code; only numeric types are enriched.
    pub value_type: i64,
    pub units: String,
}

/// One (timestamp, value) point of metric history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricSample {
    pub ts: i64,
    pub value: f64,
}

/// Problem-tracking monitoring server (incident events + metric history).
///
/// Implementations absorb transport failures: a timed-out or unconfigured
/// source contributes empty results, not errors.
#[async_trait]
pub trait IncidentSource: Send + Sync {
    /// Recent open problems, newest first, as raw source documents.
    async fn list_recent_problems(&self) -> Vec<Value>;

    /// Clock (epoch seconds) of one event, if the source knows it.
    async fn get_event_clock(&self, event_id: &str) -> Option<i64>;

    /// Resolve a host by hostname, then IP, then via the event's trigger.
    async fn resolve_host(&self, query: &HostQuery) -> Option<HostRef>;

    /// Candidate metrics for a host, filtered to key families worth
    /// enriching, capped at `max`.
    async fn list_candidate_metrics(&self, host_id: &str, max: usize) -> Vec<CandidateMetric>;

    /// Numeric history for one item inside a window, ordered by clock.
    async fn get_metric_history(
        &self,
        item_id: &str,
        value_type: i64,
        from: i64,
        till: i64,
    ) -> Vec<MetricSample>;
}

/// External uptime-checking service.
#[async_trait]
pub trait UptimeSource: Send + Sync {
    /// All monitors with their status-change logs, as raw source documents.
    async fn list_monitors_with_logs(&self) -> Vec<Value>;
}
