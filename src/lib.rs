//! Alertmedic -- monitoring-alert correlation and root-cause analysis.
//!
//! This crate correlates incident events from a monitoring server with
//! external uptime checks, enriches affected hosts with metric statistics,
//! drives a fixed multi-stage reasoning pipeline over the evidence, and
//! delivers a calibrated, guard-railed root-cause report to chat and
//! ticketing endpoints.

pub mod cache;
pub mod confidence;
pub mod config;
pub mod correlate;
pub mod deliver;
pub mod demo;
pub mod doc;
pub mod enrich;
pub mod kb;
pub mod pipeline;
pub mod reason;
pub mod report;
pub mod run;
pub mod sources;
pub mod timeparse;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::cache::SqliteCache;
use crate::config::AlertmedicConfig;
use crate::deliver::{ServiceDeskTicket, WebhookChat};
use crate::reason::OpenAiCompatClient;
use crate::run::{run_pipeline, PipelineDeps, PipelineReport};
use crate::sources::uptimerobot::UptimeRobotClient;
use crate::sources::zabbix::ZabbixClient;
use crate::sources::Limits;

/// Wire up real clients from configuration and execute one pipeline run.
pub async fn run_once(cfg: &AlertmedicConfig) -> Result<PipelineReport> {
    let limits = Limits::from_config(&cfg.concurrency);

    let cache = Arc::new(
        SqliteCache::open(&cfg.cache.db_path)
            .with_context(|| format!("failed to open cache at {}", cfg.cache.db_path))?,
    );

    let incident = Arc::new(ZabbixClient::new(
        &cfg.zabbix,
        cache.clone(),
        limits.incident.clone(),
        cfg.cache.ttl_incident_secs,
    )?);
    let uptime = Arc::new(UptimeRobotClient::new(
        &cfg.uptimerobot,
        cache.clone(),
        limits.uptime.clone(),
        cfg.cache.ttl_uptime_secs,
    )?);
    let reasoning = Arc::new(OpenAiCompatClient::new(&cfg.reasoning, limits.reasoning.clone())?);

    let deps = PipelineDeps {
        incident,
        uptime,
        reasoning,
        cache,
        chat: Some(Arc::new(WebhookChat::new(&cfg.delivery)?)),
        ticket: Some(Arc::new(ServiceDeskTicket::new(&cfg.delivery)?)),
        kb_entries: load_kb(&cfg.kb.path),
    };

    Ok(run_pipeline(&deps, cfg).await)
}

/// Load the knowledge-base JSON file, if one is configured. A missing or
/// malformed file disables matching for the run rather than failing it.
fn load_kb(path: &str) -> Option<serde_json::Value> {
    if path.is_empty() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(path, error = %e, "knowledge base file is not valid JSON, skipping");
                None
            }
        },
        Err(e) => {
            warn!(path, error = %e, "knowledge base file unreadable, skipping");
            None
        }
    }
}
