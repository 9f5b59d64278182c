//! One end-to-end pipeline run: fetch, correlate, enrich, reason, calibrate,
//! guard, match knowledge base, render, deliver.
//!
//! Every upstream failure degrades the run instead of aborting it; the run
//! always produces a report, at worst a guarded one explaining what is
//! missing.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::confidence::{self, ConfidenceMetrics, Decision};
use crate::config::AlertmedicConfig;
use crate::correlate::{self, CorrelationGroup};
use crate::deliver::{deliver_all, ChatSink, TicketSink};
use crate::enrich::{Enricher, EnrichmentResult, TimeWindow};
use crate::kb::{self, KbMatch};
use crate::pipeline::StagePipeline;
use crate::reason::ReasoningService;
use crate::report;
use crate::sources::{HostQuery, IncidentSource, UptimeSource};

/// Everything a run needs, behind trait objects so demo and test runs can
/// substitute in-process implementations.
pub struct PipelineDeps {
    pub incident: Arc<dyn IncidentSource>,
    pub uptime: Arc<dyn UptimeSource>,
    pub reasoning: Arc<dyn ReasoningService>,
    pub cache: Arc<dyn CacheStore>,
    pub chat: Option<Arc<dyn ChatSink>>,
    pub ticket: Option<Arc<dyn TicketSink>>,
    /// Pre-loaded knowledge base document, if one is configured.
    pub kb_entries: Option<Value>,
}

/// Full output of one run.
#[derive(Debug, Serialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub groups: Vec<CorrelationGroup>,
    pub enrichments: Vec<EnrichmentResult>,
    pub metrics: ConfidenceMetrics,
    pub decision: Decision,
    pub kb_match: Option<KbMatch>,
    pub resolution_md: String,
    pub chat_summary: String,
}

pub async fn run_pipeline(deps: &PipelineDeps, cfg: &AlertmedicConfig) -> PipelineReport {
    let run_id = Uuid::new_v4().to_string();
    info!(run_id = %run_id, "pipeline run starting");

    let (problems, monitors) = tokio::join!(
        deps.incident.list_recent_problems(),
        deps.uptime.list_monitors_with_logs(),
    );
    info!(problems = problems.len(), monitors = monitors.len(), "sources fetched");

    let now = chrono::Utc::now().timestamp();
    let groups = correlate::correlate(
        &problems,
        &monitors,
        now,
        cfg.pipeline.lookback_minutes,
        cfg.pipeline.window_minutes,
    );
    info!(groups = groups.len(), "correlation complete");

    let enrichments = enrich_groups(deps.incident.clone(), &groups, cfg).await;

    let stages = StagePipeline::new(
        deps.reasoning.clone(),
        deps.cache.clone(),
        cfg.cache.ttl_reasoning_secs,
    );
    let outputs = stages.run(&groups, &enrichments).await;

    let metrics = confidence::calibrate(&outputs.decision, &groups, &enrichments, &cfg.pipeline);
    let mut decision = Decision::from_stage(&outputs.decision, &metrics);
    decision.apply_guardrail(&metrics, &cfg.pipeline);
    info!(
        calibrated = metrics.calibrated,
        completeness = metrics.completeness,
        guardrail = decision.guardrail_mode,
        "decision calibrated"
    );

    let resolution_md = report::render_5w1h(&decision);

    let kb_match = deps.kb_entries.as_ref().map(|doc| {
        let entries = kb::flatten_entries(doc);
        kb::best_match(&entries, &kb_query(&decision), cfg.kb.min_score)
    });

    let chat_summary =
        report::render_chat_summary(&decision, &groups, &enrichments, kb_match.as_ref());

    deliver_all(
        deps.chat.as_deref(),
        deps.ticket.as_deref(),
        &chat_summary,
        &resolution_md,
    )
    .await;

    info!(run_id = %run_id, "pipeline run complete");
    PipelineReport {
        run_id,
        groups,
        enrichments,
        metrics,
        decision,
        kb_match,
        resolution_md,
        chat_summary,
    }
}

/// Knowledge-base query text: the decision's high-signal fields only.
/// Matching against the full rendered report would drown the root cause in
/// boilerplate tokens and flatten every similarity score.
fn kb_query(decision: &Decision) -> String {
    let mut parts = vec![decision.root_cause.clone()];
    if let Some(what) = &decision.five_w1h.what {
        parts.push(what.clone());
    }
    if let Some(why) = &decision.five_w1h.why {
        parts.push(why.clone());
    }
    parts.extend(decision.evidence.iter().cloned());
    parts.join(" ")
}

/// Enrich each distinct incident event once, even when several groups share
/// an event. Windows come from the group clocks already in hand, so no extra
/// event lookups are needed.
async fn enrich_groups(
    incident: Arc<dyn IncidentSource>,
    groups: &[CorrelationGroup],
    cfg: &AlertmedicConfig,
) -> Vec<EnrichmentResult> {
    let mut targets: Vec<(String, i64)> = Vec::new();
    for g in groups {
        let Some(id) = &g.event_id else {
            continue;
        };
        if !targets.iter().any(|(seen, _)| seen == id) {
            targets.push((id.clone(), g.incident_ts));
        }
    }
    if targets.is_empty() {
        warn!("no enrichable events in this run");
        return Vec::new();
    }

    let enricher = Enricher::new(incident, cfg.pipeline.clone());
    let tasks = targets.iter().map(|(event_id, ts)| {
        let enricher = &enricher;
        let query = HostQuery { event_id: Some(event_id.clone()), ..Default::default() };
        let window = TimeWindow::around_event(
            *ts,
            cfg.pipeline.lookback_minutes,
            cfg.pipeline.window_minutes,
        );
        async move { enricher.enrich(&query, Some(event_id.as_str()), Some(window)).await }
    });

    futures::future::join_all(tasks).await
}
