//! Per-host metric enrichment: fetch numeric history around the incident
//! window, summarize each metric statistically, and rank by anomaly score.
//!
//! Ranking is by anomaly score rather than raw delta: delta is unit-sensitive
//! across heterogeneous metrics, while change-ratio plus volatility is
//! comparable between, say, CPU percent and network bytes.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::sources::{CandidateMetric, HostQuery, IncidentSource, MetricSample};

/// Zabbix numeric value types: 0 = float, 3 = unsigned.
const NUMERIC_VALUE_TYPES: &[i64] = &[0, 3];

/// Inclusive time window in epoch seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    /// Window around an event clock: the configured lookback before it, and
    /// the correlation window after it.
    pub fn around_event(clock: i64, lookback_minutes: i64, window_minutes: i64) -> Self {
        Self {
            start: clock - lookback_minutes * 60,
            end: clock + window_minutes * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// Anomaly score weighting. Favors sustained directional change over mere
/// range, so metrics that moved meaningfully outrank ones that jitter.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub movement: f64,
    pub volatility: f64,
}

impl ScoreWeights {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            movement: cfg.movement_weight,
            volatility: cfg.volatility_weight,
        }
    }
}

/// Statistical summary of one metric over the window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSummary {
    pub item_id: String,
    pub name: String,
    pub key: String,
    pub units: String,
    pub count: usize,
    pub first: f64,
    pub latest: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    /// max - min over the window.
    pub delta: f64,
    /// latest - first over the window.
    pub change: f64,
    pub trend: Trend,
    pub volatility: f64,
    pub anomaly_score: f64,
}

/// Summarize one metric's samples. Zero samples yields `None`; such
/// candidates are dropped rather than reported with sentinel statistics.
pub fn summarize(
    meta: &CandidateMetric,
    samples: &[MetricSample],
    weights: &ScoreWeights,
) -> Option<MetricSummary> {
    if samples.is_empty() {
        return None;
    }

    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let first = values[0];
    let latest = values[values.len() - 1];
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    let delta = max - min;
    let change = latest - first;

    let trend = if latest > first {
        Trend::Up
    } else if latest < first {
        Trend::Down
    } else {
        Trend::Stable
    };

    // Movement: |change| normalized by the starting magnitude. A metric
    // starting at zero has no meaningful ratio, so it contributes nothing.
    let movement = if first.abs() > f64::EPSILON {
        (change.abs() / first.abs()).clamp(0.0, 1.0)
    } else {
        0.0
    };

    // Volatility: range normalized by average magnitude, falling back to the
    // raw range (clamped) when the average is zero.
    let volatility = if avg.abs() > f64::EPSILON {
        (delta / avg.abs()).clamp(0.0, 1.0)
    } else {
        delta.clamp(0.0, 1.0)
    };

    let anomaly_score = round4(weights.movement * movement + weights.volatility * volatility);
    debug_assert!(
        (0.0..=1.0).contains(&anomaly_score),
        "anomaly score out of range: {anomaly_score}"
    );

    Some(MetricSummary {
        item_id: meta.item_id.clone(),
        name: meta.name.clone(),
        key: meta.key.clone(),
        units: meta.units.clone(),
        count: values.len(),
        first,
        latest,
        min,
        max,
        avg,
        delta,
        change,
        trend,
        volatility: round4(volatility),
        anomaly_score,
    })
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Enrichment of one (host, event) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub host_id: Option<String>,
    pub hostname: Option<String>,
    pub event_id: Option<String>,
    pub window: Option<TimeWindow>,
    /// Mean anomaly score over the kept top-N metrics; 0 when none kept.
    pub host_anomaly_score: f64,
    /// Top-N metric summaries, ranked by anomaly score descending.
    pub metrics: Vec<MetricSummary>,
    /// Subset of `metrics` at or above the significance threshold.
    pub anomalies: Vec<MetricSummary>,
    /// Set when the enrichment failed soft (host or window unresolvable).
    pub note: Option<String>,
}

impl EnrichmentResult {
    fn empty(event_id: Option<&str>, note: &str) -> Self {
        Self {
            host_id: None,
            hostname: None,
            event_id: event_id.map(str::to_string),
            window: None,
            host_anomaly_score: 0.0,
            metrics: Vec::new(),
            anomalies: Vec::new(),
            note: Some(note.to_string()),
        }
    }
}

/// Fetches and ranks metric history for enrichment targets.
///
/// Per-metric history fetches fan out concurrently; they share the incident
/// source's permit pool, so the bound is enforced inside the source client.
pub struct Enricher {
    source: Arc<dyn IncidentSource>,
    cfg: PipelineConfig,
}

impl Enricher {
    pub fn new(source: Arc<dyn IncidentSource>, cfg: PipelineConfig) -> Self {
        Self { source, cfg }
    }

    pub async fn enrich(
        &self,
        query: &HostQuery,
        event_id: Option<&str>,
        explicit_window: Option<TimeWindow>,
    ) -> EnrichmentResult {
        let Some(host) = self.source.resolve_host(query).await else {
            debug!(?query, "enrichment skipped: host not resolved");
            return EnrichmentResult::empty(event_id, "host not resolved on incident source");
        };

        let window = match explicit_window {
            Some(w) => Some(w),
            None => match event_id {
                Some(id) => self.source.get_event_clock(id).await.map(|clock| {
                    TimeWindow::around_event(
                        clock,
                        self.cfg.lookback_minutes,
                        self.cfg.window_minutes,
                    )
                }),
                None => None,
            },
        };
        let Some(window) = window else {
            return EnrichmentResult::empty(event_id, "no time window resolvable for event");
        };

        let candidates = self
            .source
            .list_candidate_metrics(&host.host_id, self.cfg.max_candidate_metrics)
            .await;

        let weights = ScoreWeights::from_config(&self.cfg);
        let fetches = candidates
            .iter()
            .filter(|c| NUMERIC_VALUE_TYPES.contains(&c.value_type))
            .map(|c| async {
                let samples = self
                    .source
                    .get_metric_history(&c.item_id, c.value_type, window.start, window.end)
                    .await;
                summarize(c, &samples, &weights)
            });

        let mut summaries: Vec<MetricSummary> =
            join_all(fetches).await.into_iter().flatten().collect();

        // Rank by anomaly score descending; stable sort keeps ties in
        // candidate order so identical inputs rank identically.
        summaries.sort_by(|a, b| b.anomaly_score.total_cmp(&a.anomaly_score));
        summaries.truncate(self.cfg.top_metrics);

        let anomalies: Vec<MetricSummary> = summaries
            .iter()
            .filter(|m| m.anomaly_score >= self.cfg.anomaly_significance)
            .cloned()
            .collect();

        let host_anomaly_score = if summaries.is_empty() {
            0.0
        } else {
            round4(summaries.iter().map(|m| m.anomaly_score).sum::<f64>() / summaries.len() as f64)
        };

        if summaries.is_empty() {
            warn!(host = %host.hostname, "no metric history inside the window");
        }

        EnrichmentResult {
            host_id: Some(host.host_id),
            hostname: Some(host.hostname),
            event_id: event_id.map(str::to_string),
            window: Some(window),
            host_anomaly_score,
            metrics: summaries,
            anomalies,
            note: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    fn meta(id: &str) -> CandidateMetric {
        CandidateMetric {
            item_id: id.to_string(),
            name: format!("metric {id}"),
            key: format!("system.test[{id}]"),
            value_type: 0,
            units: String::new(),
        }
    }

    fn series(values: &[f64]) -> Vec<MetricSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| MetricSample { ts: 1000 + i as i64 * 60, value: v })
            .collect()
    }

    const W: ScoreWeights = ScoreWeights { movement: 0.6, volatility: 0.4 };

    #[test]
    fn test_flat_series_scores_zero() {
        let s = summarize(&meta("1"), &series(&[10.0, 10.0, 10.0, 10.0]), &W).unwrap();
        assert_eq!(s.trend, Trend::Stable);
        assert_eq!(s.delta, 0.0);
        assert_eq!(s.change, 0.0);
        assert_eq!(s.anomaly_score, 0.0);
    }

    #[test]
    fn test_rising_series_scores_high() {
        let s = summarize(&meta("1"), &series(&[10.0, 12.0, 40.0, 42.0]), &W).unwrap();
        assert_eq!(s.trend, Trend::Up);
        assert_eq!(s.change, 32.0);
        assert!(s.anomaly_score > 0.6, "score {}", s.anomaly_score);
    }

    #[test]
    fn test_score_always_in_unit_range() {
        for values in [
            vec![0.0, 0.0],
            vec![0.0, 1e12],
            vec![-5.0, 5.0],
            vec![1e-9, -1e-9],
            vec![100.0, 1.0],
        ] {
            let s = summarize(&meta("1"), &series(&values), &W).unwrap();
            assert!(
                (0.0..=1.0).contains(&s.anomaly_score),
                "{values:?} -> {}",
                s.anomaly_score
            );
        }
    }

    #[test]
    fn test_empty_series_is_dropped() {
        assert!(summarize(&meta("1"), &[], &W).is_none());
    }

    #[test]
    fn test_zero_first_contributes_no_movement() {
        let s = summarize(&meta("1"), &series(&[0.0, 0.0, 0.4]), &W).unwrap();
        // movement = 0 (ratio undefined), volatility = 0.4 / |avg| clamped.
        assert_eq!(s.trend, Trend::Up);
        assert!(s.anomaly_score <= 0.4 + 1e-9);
    }

    // -- Enricher against a fake source ------------------------------------

    struct FakeSource;

    #[async_trait]
    impl IncidentSource for FakeSource {
        async fn list_recent_problems(&self) -> Vec<Value> {
            Vec::new()
        }

        async fn get_event_clock(&self, event_id: &str) -> Option<i64> {
            (event_id == "42").then_some(10_000)
        }

        async fn resolve_host(&self, query: &HostQuery) -> Option<HostRef> {
            query.event_id.as_deref().map(|_| HostRef {
                host_id: "10084".to_string(),
                hostname: "db-01".to_string(),
            })
        }

        async fn list_candidate_metrics(&self, _host_id: &str, _max: usize) -> Vec<CandidateMetric> {
            vec![
                meta("flat"),
                meta("spike"),
                CandidateMetric { value_type: 4, ..meta("textual") },
                meta("empty"),
            ]
        }

        async fn get_metric_history(
            &self,
            item_id: &str,
            _value_type: i64,
            _from: i64,
            _till: i64,
        ) -> Vec<MetricSample> {
            match item_id {
                "flat" => series(&[5.0, 5.0, 5.0]),
                "spike" => series(&[10.0, 12.0, 40.0, 42.0]),
                _ => Vec::new(),
            }
        }
    }

    use crate::sources::HostRef;

    #[tokio::test]
    async fn test_enrich_ranks_by_anomaly_score() {
        let enricher = Enricher::new(Arc::new(FakeSource), PipelineConfig::default());
        let query = HostQuery { event_id: Some("42".to_string()), ..Default::default() };

        let result = enricher.enrich(&query, Some("42"), None).await;
        assert_eq!(result.hostname.as_deref(), Some("db-01"));
        assert!(result.note.is_none());

        // Textual and empty candidates dropped; spike outranks flat.
        assert_eq!(result.metrics.len(), 2);
        assert_eq!(result.metrics[0].item_id, "spike");
        assert_eq!(result.metrics[1].item_id, "flat");
        assert_eq!(result.anomalies.len(), 1);
        assert!(result.host_anomaly_score > 0.0);

        // Window derived from the event clock.
        let w = result.window.unwrap();
        assert_eq!(w.start, 10_000 - 30 * 60);
        assert_eq!(w.end, 10_000 + 10 * 60);
    }

    #[tokio::test]
    async fn test_enrich_fails_soft_without_host() {
        let enricher = Enricher::new(Arc::new(FakeSource), PipelineConfig::default());
        let result = enricher.enrich(&HostQuery::default(), None, None).await;
        assert!(result.metrics.is_empty());
        assert_eq!(result.host_anomaly_score, 0.0);
        assert!(result.note.is_some());
    }
}
