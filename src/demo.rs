//! Self-contained demo run: fixture sources and a scripted reasoning service,
//! no network, no credentials. Useful for trying the report output and for
//! smoke-testing the wiring on a fresh install.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::cache::MemoryCache;
use crate::reason::{ReasonError, ReasoningService};
use crate::run::PipelineDeps;
use crate::sources::{
    CandidateMetric, HostQuery, HostRef, IncidentSource, MetricSample, UptimeSource,
};

struct DemoIncidents {
    now: i64,
}

#[async_trait]
impl IncidentSource for DemoIncidents {
    async fn list_recent_problems(&self) -> Vec<Value> {
        vec![
            json!({
                "eventid": "7001",
                "name": "High memory utilization on app-02 (>90%)",
                "severity": "4",
                "clock": self.now - 300,
                "tags": [ { "tag": "service", "value": "checkout" } ],
            }),
            json!({
                "eventid": "7002",
                "name": "HTTPS probe failed on shop.example",
                "severity": "3",
                "clock": self.now - 240,
                "tags": [],
            }),
        ]
    }

    async fn get_event_clock(&self, event_id: &str) -> Option<i64> {
        match event_id {
            "7001" => Some(self.now - 300),
            "7002" => Some(self.now - 240),
            _ => None,
        }
    }

    async fn resolve_host(&self, query: &HostQuery) -> Option<HostRef> {
        match query.event_id.as_deref() {
            Some("7001") => Some(HostRef {
                host_id: "10201".to_string(),
                hostname: "app-02".to_string(),
            }),
            Some("7002") => Some(HostRef {
                host_id: "10202".to_string(),
                hostname: "lb-01".to_string(),
            }),
            _ => None,
        }
    }

    async fn list_candidate_metrics(&self, host_id: &str, _max: usize) -> Vec<CandidateMetric> {
        if host_id == "10201" {
            vec![
                CandidateMetric {
                    item_id: "mem".to_string(),
                    name: "Memory utilization".to_string(),
                    key: "vm.memory.utilization".to_string(),
                    value_type: 0,
                    units: "%".to_string(),
                },
                CandidateMetric {
                    item_id: "cpu".to_string(),
                    name: "CPU utilization".to_string(),
                    key: "system.cpu.util".to_string(),
                    value_type: 0,
                    units: "%".to_string(),
                },
            ]
        } else {
            vec![CandidateMetric {
                item_id: "conn".to_string(),
                name: "Active connections".to_string(),
                key: "net.tcp.service.perf[https]".to_string(),
                value_type: 3,
                units: String::new(),
            }]
        }
    }

    async fn get_metric_history(
        &self,
        item_id: &str,
        _value_type: i64,
        from: i64,
        _till: i64,
    ) -> Vec<MetricSample> {
        let series: &[f64] = match item_id {
            "mem" => &[55.0, 61.0, 78.0, 92.0, 94.0],
            "cpu" => &[30.0, 32.0, 31.0, 33.0, 30.0],
            "conn" => &[120.0, 118.0, 40.0, 12.0, 3.0],
            _ => &[],
        };
        series
            .iter()
            .enumerate()
            .map(|(i, &value)| MetricSample { ts: from + i as i64 * 60, value })
            .collect()
    }
}

struct DemoUptime {
    now: i64,
}

#[async_trait]
impl UptimeSource for DemoUptime {
    async fn list_monitors_with_logs(&self) -> Vec<Value> {
        vec![json!({
            "friendly_name": "shop.example storefront",
            "url": "https://shop.example",
            "status": 9,
            "logs": [
                { "type": 1, "datetime": self.now - 250, "reason": { "code": "timeout" } },
            ],
        })]
    }
}

struct DemoReasoning;

#[async_trait]
impl ReasoningService for DemoReasoning {
    fn model(&self) -> &str {
        "demo-fixture"
    }

    async fn complete(&self, system_prompt: &str, _payload: &Value) -> Result<String, ReasonError> {
        let doc = if system_prompt.contains("Collector Agent") {
            json!({
                "timeline": [
                    "memory on app-02 climbing past 90%",
                    "storefront HTTPS probe timed out shortly after",
                ],
                "key_entities": ["app-02", "shop.example"],
            })
        } else if system_prompt.contains("Correlation Agent") {
            json!({ "clusters": [ { "cause": "app-02 memory pressure", "members": ["7001", "7002"] } ] })
        } else if system_prompt.contains("Hypothesis Agent") {
            json!({ "hypotheses": [
                { "cause": "memory leak in checkout service on app-02", "confidence": 0.8,
                  "evidence": ["steady memory climb", "frontend timeout follows"], "missing_data": [] },
            ] })
        } else if system_prompt.contains("Verifier Agent") {
            json!({ "verdicts": [ { "hypothesis": 0, "robust": true, "notes": "metric trend supports it" } ] })
        } else {
            json!({
                "root_cause": "memory leak in the checkout service exhausted app-02, stalling storefront responses",
                "confidence": 0.82,
                "impact": "storefront checkout unavailable for roughly five minutes",
                "evidence": [
                    "memory utilization rose 55% to 94% before the probe failure",
                    "HTTPS probe timeout within the correlation window",
                ],
                "immediate_actions": ["restart the checkout service on app-02"],
                "preventive_actions": ["add a memory ceiling and leak alerting for checkout"],
                "itsm_5w1h": {
                    "who": "platform on-call",
                    "what": "checkout service memory exhaustion",
                    "when": "five minutes before the storefront probe failure",
                    "where": "app-02",
                    "why": "unbounded cache growth in the checkout service",
                    "how": "memory pressure stalled request handling until probes timed out"
                },
            })
        };
        Ok(doc.to_string())
    }
}

/// Dependencies for a fully offline demo run.
pub fn demo_deps(now: i64) -> PipelineDeps {
    PipelineDeps {
        incident: Arc::new(DemoIncidents { now }),
        uptime: Arc::new(DemoUptime { now }),
        reasoning: Arc::new(DemoReasoning),
        cache: Arc::new(MemoryCache::new()),
        chat: None,
        ticket: None,
        kb_entries: Some(json!([
            {
                "id": "KB-2041",
                "title": "memory leak in the checkout service",
                "root_cause": "unbounded cache growth in the checkout service exhausted memory stalling storefront responses",
            },
            {
                "id": "KB-1977",
                "title": "expired TLS certificate on storefront load balancer",
                "root_cause": "certificate rotation missed",
                "solution": "renew and reload the listener",
            },
        ])),
    }
}
