//! End-to-end pipeline tests over in-process sources and a real on-disk
//! cache, exercising the wiring the way the binary does.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use alertmedic::cache::SqliteCache;
use alertmedic::config::AlertmedicConfig;
use alertmedic::reason::{ReasonError, ReasoningService};
use alertmedic::run::{run_pipeline, PipelineDeps};
use alertmedic::sources::{
    CandidateMetric, HostQuery, HostRef, IncidentSource, MetricSample, UptimeSource,
};

struct OneProblemSource {
    clock: i64,
}

#[async_trait]
impl IncidentSource for OneProblemSource {
    async fn list_recent_problems(&self) -> Vec<Value> {
        vec![json!({
            "eventid": "555",
            "name": "Disk space critically low on db-01",
            "severity": "5",
            "clock": self.clock,
        })]
    }

    async fn get_event_clock(&self, _event_id: &str) -> Option<i64> {
        Some(self.clock)
    }

    async fn resolve_host(&self, _query: &HostQuery) -> Option<HostRef> {
        Some(HostRef { host_id: "10050".to_string(), hostname: "db-01".to_string() })
    }

    async fn list_candidate_metrics(&self, _host_id: &str, _max: usize) -> Vec<CandidateMetric> {
        vec![CandidateMetric {
            item_id: "disk".to_string(),
            name: "Free disk space on /var".to_string(),
            key: "vfs.fs.size[/var,free]".to_string(),
            value_type: 0,
            units: "B".to_string(),
        }]
    }

    async fn get_metric_history(
        &self,
        _item_id: &str,
        _value_type: i64,
        from: i64,
        _till: i64,
    ) -> Vec<MetricSample> {
        [90.0, 60.0, 25.0, 5.0]
            .iter()
            .enumerate()
            .map(|(i, &value)| MetricSample { ts: from + i as i64 * 60, value })
            .collect()
    }
}

struct SilentUptime;

#[async_trait]
impl UptimeSource for SilentUptime {
    async fn list_monitors_with_logs(&self) -> Vec<Value> {
        Vec::new()
    }
}

struct CountingReasoning {
    calls: AtomicUsize,
}

#[async_trait]
impl ReasoningService for CountingReasoning {
    fn model(&self) -> &str {
        "counting"
    }

    async fn complete(&self, prompt: &str, _payload: &Value) -> Result<String, ReasonError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("Decision Agent") {
            Ok(r#"{
                "root_cause": "log rotation stopped, filling /var on db-01",
                "confidence": 0.9,
                "evidence": ["free space fell from 90 to 5 over the window"],
                "itsm_5w1h": { "who": "dba", "what": "disk exhaustion", "when": "incident window",
                               "where": "db-01", "why": "stuck logrotate", "how": "unrotated logs grew" }
            }"#
            .to_string())
        } else {
            Ok(r#"{"ok": true}"#.to_string())
        }
    }
}

fn deps(cache: Arc<SqliteCache>, reasoning: Arc<CountingReasoning>, clock: i64) -> PipelineDeps {
    PipelineDeps {
        incident: Arc::new(OneProblemSource { clock }),
        uptime: Arc::new(SilentUptime),
        reasoning,
        cache,
        chat: None,
        ticket: None,
        kb_entries: None,
    }
}

#[tokio::test]
async fn test_repeat_run_hits_reasoning_cache() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("cache.db");
    let cache = Arc::new(SqliteCache::open(db.to_str().unwrap()).unwrap());
    let reasoning = Arc::new(CountingReasoning { calls: AtomicUsize::new(0) });

    let clock = chrono::Utc::now().timestamp() - 120;
    let cfg = AlertmedicConfig::default();

    let first = run_pipeline(&deps(cache.clone(), reasoning.clone(), clock), &cfg).await;
    assert_eq!(reasoning.calls.load(Ordering::SeqCst), 5);
    assert_eq!(first.decision.root_cause, "log rotation stopped, filling /var on db-01");
    assert!(!first.decision.guardrail_mode);

    // Same inputs, same cache: no new reasoning calls, same decision.
    let second = run_pipeline(&deps(cache, reasoning.clone(), clock), &cfg).await;
    assert_eq!(reasoning.calls.load(Ordering::SeqCst), 5);
    assert_eq!(second.decision.root_cause, first.decision.root_cause);
}

struct HedgingReasoning;

#[async_trait]
impl ReasoningService for HedgingReasoning {
    fn model(&self) -> &str {
        "hedging"
    }

    async fn complete(&self, _prompt: &str, _payload: &Value) -> Result<String, ReasonError> {
        // A model with no evidence to work from hedges and names nothing.
        Ok(r#"{"confidence": 0.3, "notes": "insufficient data"}"#.to_string())
    }
}

#[tokio::test]
async fn test_stale_incident_yields_guarded_report() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("cache.db");
    let cache = Arc::new(SqliteCache::open(db.to_str().unwrap()).unwrap());

    // Incident far outside the lookback window: nothing correlates, nothing
    // enriches, and the guardrail must engage on the thin decision.
    let clock = chrono::Utc::now().timestamp() - 3 * 3600;
    let deps = PipelineDeps {
        incident: Arc::new(OneProblemSource { clock }),
        uptime: Arc::new(SilentUptime),
        reasoning: Arc::new(HedgingReasoning),
        cache,
        chat: None,
        ticket: None,
        kb_entries: None,
    };
    let report = run_pipeline(&deps, &AlertmedicConfig::default()).await;

    assert!(report.groups.is_empty());
    assert!(report.enrichments.is_empty());
    assert!(report.decision.guardrail_mode);
    assert!(report.decision.root_cause.starts_with("Likely:"));
    assert!(report.resolution_md.contains("### Missing data"));
}
