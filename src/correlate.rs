//! Time-window correlation of incident events with uptime-check logs.
//!
//! Correlation runs after both source fetches have fully resolved, so the
//! output is deterministic regardless of fetch completion order: groups
//! preserve incident input order, matched lists preserve uptime source order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::doc;
use crate::timeparse;

/// One flattened status-change log entry from the uptime source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UptimeEvent {
    pub ts: i64,
    pub monitor: Option<String>,
    pub url: Option<String>,
    pub status: Option<String>,
    pub log: Value,
}

/// One incident event plus every uptime event inside its window.
///
/// Groups are created once per qualifying incident event and never mutated;
/// the same uptime log entry may legitimately appear in multiple groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationGroup {
    pub event_id: Option<String>,
    pub name: Option<String>,
    pub severity: Option<String>,
    pub tags: Value,
    pub incident_ts: i64,
    pub matched: Vec<UptimeEvent>,
    pub window_secs: i64,
}

/// Extract the incident event's clock from whichever field carries it.
pub fn incident_ts(problem: &Value) -> Option<i64> {
    for field in ["clock", "event_time", "timestamp"] {
        if let Some(ts) = problem.get(field).and_then(timeparse::parse_timestamp) {
            return Some(ts);
        }
    }
    None
}

/// Extract a log entry's timestamp from whichever field carries it.
pub fn uptime_log_ts(log: &Value) -> Option<i64> {
    for field in ["datetime", "created_at", "time"] {
        if let Some(ts) = log.get(field).and_then(timeparse::parse_timestamp) {
            return Some(ts);
        }
    }
    None
}

/// Flatten monitors into individual log-level events. Each log timestamp is
/// normalized independently; unparseable entries are dropped, never guessed.
pub fn flatten_uptime_events(monitors: &[Value]) -> Vec<UptimeEvent> {
    let mut events = Vec::new();
    for monitor in monitors {
        for log in doc::list_field(monitor, "logs") {
            let Some(ts) = uptime_log_ts(log) else {
                continue;
            };
            events.push(UptimeEvent {
                ts,
                monitor: doc::str_field(monitor, "friendly_name"),
                url: doc::str_field(monitor, "url"),
                status: doc::str_field(monitor, "status"),
                log: log.clone(),
            });
        }
    }
    events
}

/// Group incident events with uptime events inside a closed symmetric window.
///
/// Incident events older than `now - lookback_minutes` or without a
/// parseable timestamp are skipped. The window boundary is inclusive: an
/// uptime event exactly `window_minutes * 60` seconds away still matches.
pub fn correlate(
    problems: &[Value],
    monitors: &[Value],
    now: i64,
    lookback_minutes: i64,
    window_minutes: i64,
) -> Vec<CorrelationGroup> {
    let since = now - lookback_minutes * 60;
    let window_secs = window_minutes * 60;
    let uptime_events = flatten_uptime_events(monitors);

    let mut groups = Vec::new();
    for problem in problems {
        let Some(ts) = incident_ts(problem) else {
            continue;
        };
        if ts < since {
            continue;
        }

        let matched: Vec<UptimeEvent> = uptime_events
            .iter()
            .filter(|u| (ts - u.ts).abs() <= window_secs)
            .cloned()
            .collect();

        groups.push(CorrelationGroup {
            event_id: doc::str_field(problem, "eventid"),
            name: doc::str_field(problem, "name"),
            severity: doc::str_field(problem, "severity"),
            tags: problem.get("tags").cloned().unwrap_or(Value::Array(Vec::new())),
            incident_ts: ts,
            matched,
            window_secs,
        });
    }
    groups
}

/// Fraction of groups with at least one matched uptime event, in [0,1].
pub fn corr_density(groups: &[CorrelationGroup]) -> f64 {
    if groups.is_empty() {
        return 0.0;
    }
    let with_match = groups.iter().filter(|g| !g.matched.is_empty()).count();
    with_match as f64 / groups.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn problem(eventid: &str, clock: i64, severity: &str) -> Value {
        json!({ "eventid": eventid, "name": "test problem", "severity": severity, "clock": clock })
    }

    fn monitor(name: &str, log_times: &[i64]) -> Value {
        let logs: Vec<Value> = log_times.iter().map(|t| json!({ "datetime": t, "type": 1 })).collect();
        json!({ "friendly_name": name, "url": "https://svc.example", "status": 9, "logs": logs })
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        // Incident at epoch 1000, window 10 min: 1550 matches (delta 550),
        // exactly 1600 matches (delta 600), 1700 does not (delta 700).
        let problems = vec![problem("1", 1000, "high")];
        let monitors = vec![monitor("svc", &[1550, 1600, 1700])];

        let groups = correlate(&problems, &monitors, 1000, 30, 10);
        assert_eq!(groups.len(), 1);
        let deltas: Vec<i64> = groups[0].matched.iter().map(|u| u.ts).collect();
        assert_eq!(deltas, vec![1550, 1600]);
        assert_eq!(groups[0].window_secs, 600);
        assert_eq!(groups[0].severity.as_deref(), Some("high"));
    }

    #[test]
    fn test_lookback_discards_old_incidents() {
        let now = 100_000;
        let problems = vec![
            problem("old", now - 31 * 60, "4"),
            problem("fresh", now - 60, "4"),
        ];
        let groups = correlate(&problems, &[], now, 30, 10);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].event_id.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_unparseable_timestamps_are_skipped() {
        let problems = vec![
            json!({ "eventid": "1", "clock": "not a time" }),
            problem("2", 500, "2"),
        ];
        let monitors = vec![json!({
            "friendly_name": "svc",
            "logs": [ { "datetime": "garbage" }, { "datetime": 510 } ],
        })];

        let groups = correlate(&problems, &monitors, 600, 30, 10);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].matched.len(), 1);
        assert_eq!(groups[0].matched[0].ts, 510);
    }

    #[test]
    fn test_uptime_order_independence() {
        // Shuffling uptime monitors does not change which events match.
        let problems = vec![problem("1", 1000, "3")];
        let a = vec![monitor("m1", &[900]), monitor("m2", &[1100])];
        let b = vec![monitor("m2", &[1100]), monitor("m1", &[900])];

        let ga = correlate(&problems, &a, 1000, 30, 10);
        let gb = correlate(&problems, &b, 1000, 30, 10);

        let mut ta: Vec<i64> = ga[0].matched.iter().map(|u| u.ts).collect();
        let mut tb: Vec<i64> = gb[0].matched.iter().map(|u| u.ts).collect();
        ta.sort_unstable();
        tb.sort_unstable();
        assert_eq!(ta, tb);
    }

    #[test]
    fn test_no_global_dedup_across_groups() {
        let problems = vec![problem("1", 1000, "3"), problem("2", 1200, "3")];
        let monitors = vec![monitor("m", &[1100])];

        let groups = correlate(&problems, &monitors, 1200, 30, 10);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].matched.len(), 1);
        assert_eq!(groups[1].matched.len(), 1);
    }

    #[test]
    fn test_corr_density() {
        let problems = vec![problem("1", 1000, "3"), problem("2", 50_000, "3")];
        let monitors = vec![monitor("m", &[1100])];
        let groups = correlate(&problems, &monitors, 50_000, 3000, 10);
        assert_eq!(groups.len(), 2);
        assert!((corr_density(&groups) - 0.5).abs() < 1e-9);
        assert_eq!(corr_density(&[]), 0.0);
    }
}
