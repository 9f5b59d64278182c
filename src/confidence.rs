//! Confidence calibration and the conservative-language guardrail.
//!
//! The decision stage's self-reported confidence is blended with the
//! quantitative signals of the run (metric anomaly, correlation density,
//! input completeness) into one calibrated value. When that value or the
//! completeness is too low, the decision is rewritten in conservative terms:
//! the root cause is prefixed "Likely:" and the missing data is spelled out.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::PipelineConfig;
use crate::correlate::{self, CorrelationGroup};
use crate::doc;
use crate::enrich::EnrichmentResult;

/// Fallback when the decision stage reports nothing parseable: neutral, so
/// calibration leans on the quantitative signals.
const DEFAULT_LLM_CONF: f64 = 0.5;

const STANDARD_MISSING_DATA: &[&str] = &[
    "Additional host metrics for the affected window",
    "Correlated application logs around the event time",
    "On-call engineer confirmation of observed impact",
];

const GUARDRAIL_ACTION: &str = "Collect the listed missing data before ticket closure";

const GUARDRAIL_PREFIX: &str = "Likely:";

const DEFAULT_ROOT_CAUSE: &str = "Root cause undetermined";

/// Quantitative signals blended into the calibrated confidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceMetrics {
    pub llm_conf: f64,
    pub anomaly: f64,
    pub corr_density: f64,
    pub completeness: f64,
    pub calibrated: f64,
}

/// Blend the decision stage output with the run's quantitative signals.
///
/// Each component lives in [0,1] and the weights sum to 1, so the calibrated
/// value is in [0,1] and monotonically non-decreasing in every component.
pub fn calibrate(
    decision: &Value,
    groups: &[CorrelationGroup],
    enrichments: &[EnrichmentResult],
    cfg: &PipelineConfig,
) -> ConfidenceMetrics {
    let llm_conf = doc::f64_field(decision, "confidence")
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_LLM_CONF);

    let anomaly = enrichments
        .iter()
        .map(|e| e.host_anomaly_score)
        .fold(0.0_f64, f64::max)
        .clamp(0.0, 1.0);

    let corr_density = correlate::corr_density(groups);

    // Five expected inputs: correlation groups, enrichment metrics, and the
    // decision's evidence, root cause, and 5W1H block.
    let present = [
        !groups.is_empty(),
        enrichments.iter().any(|e| !e.metrics.is_empty()),
        doc::has_field(decision, "evidence"),
        doc::has_field(decision, "root_cause"),
        doc::has_field(decision, "itsm_5w1h"),
    ]
    .iter()
    .filter(|p| **p)
    .count();
    let completeness = present as f64 / 5.0;

    let calibrated = (cfg.weight_llm_conf * llm_conf
        + cfg.weight_anomaly * anomaly
        + cfg.weight_corr_density * corr_density
        + cfg.weight_completeness * completeness)
        .clamp(0.0, 1.0);

    ConfidenceMetrics { llm_conf, anomaly, corr_density, completeness, calibrated }
}

/// Structured who/what/when/where/why/how block for ticketing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FiveW1H {
    pub who: Option<String>,
    pub what: Option<String>,
    pub when: Option<String>,
    pub r#where: Option<String>,
    pub why: Option<String>,
    pub how: Option<String>,
}

impl FiveW1H {
    fn from_doc(block: &Value) -> Self {
        Self {
            who: doc::str_field(block, "who"),
            what: doc::str_field(block, "what"),
            when: doc::str_field(block, "when"),
            r#where: doc::str_field(block, "where"),
            why: doc::str_field(block, "why"),
            how: doc::str_field(block, "how"),
        }
    }
}

/// The externally visible root-cause decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub root_cause: String,
    /// What the decision stage itself reported, kept for auditability.
    pub confidence_raw: f64,
    /// Always the calibrated value; this is what callers act on.
    pub confidence_calibrated: f64,
    pub guardrail_mode: bool,
    pub missing_data: Vec<String>,
    pub immediate_actions: Vec<String>,
    pub preventive_actions: Vec<String>,
    pub impact: Option<String>,
    pub evidence: Vec<String>,
    pub five_w1h: FiveW1H,
}

impl Decision {
    /// Build the decision from the stage document, overwriting the stage's
    /// confidence with the calibrated value.
    pub fn from_stage(decision_doc: &Value, metrics: &ConfidenceMetrics) -> Self {
        let five_w1h = decision_doc
            .get("itsm_5w1h")
            .map(FiveW1H::from_doc)
            .unwrap_or_default();

        Self {
            root_cause: doc::str_field(decision_doc, "root_cause")
                .unwrap_or_else(|| DEFAULT_ROOT_CAUSE.to_string()),
            confidence_raw: metrics.llm_conf,
            confidence_calibrated: metrics.calibrated,
            guardrail_mode: false,
            missing_data: dedup(doc::str_list_field(decision_doc, "missing_data")),
            immediate_actions: doc::str_list_field(decision_doc, "immediate_actions"),
            preventive_actions: doc::str_list_field(decision_doc, "preventive_actions"),
            impact: doc::str_field(decision_doc, "impact"),
            evidence: doc::str_list_field(decision_doc, "evidence"),
            five_w1h,
        }
    }

    /// Engage the guardrail when the evidence is too weak to state a root
    /// cause plainly. Idempotent: reapplying changes nothing, and guardrail
    /// mode is never reverted within a run.
    pub fn apply_guardrail(&mut self, metrics: &ConfidenceMetrics, cfg: &PipelineConfig) {
        let triggered = metrics.calibrated < cfg.guardrail_min_confidence
            || metrics.completeness < cfg.guardrail_min_completeness;
        if !triggered {
            return;
        }

        self.guardrail_mode = true;

        if !self.root_cause.starts_with(GUARDRAIL_PREFIX) {
            self.root_cause = format!("{GUARDRAIL_PREFIX} {}", self.root_cause);
        }

        for item in STANDARD_MISSING_DATA {
            if !self.missing_data.iter().any(|m| m == item) {
                self.missing_data.push(item.to_string());
            }
        }

        if !self.immediate_actions.iter().any(|a| a == GUARDRAIL_ACTION) {
            self.immediate_actions.push(GUARDRAIL_ACTION.to_string());
        }
    }
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(items.len());
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}
