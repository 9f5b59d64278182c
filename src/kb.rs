//! Knowledge-base retrieval by weighted token overlap.
//!
//! Entries are arbitrary JSON documents; named fields contribute a weighted
//! Jaccard similarity against the query text. No embedding model, no index:
//! knowledge bases here are small enough that a linear scan is fine.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::doc;

/// Field weights, highest-signal first. Fields absent from an entry do not
/// count against it: scores normalize over the weights actually present.
const FIELD_WEIGHTS: &[(&str, f64)] = &[
    ("title", 3.0),
    ("root_cause", 3.0),
    ("solution", 2.0),
    ("problem", 2.0),
    ("summary", 1.5),
    ("description", 1.0),
    ("content", 0.5),
];

const ID_FIELDS: &[&str] = &["id", "entry_id", "kb_id"];

/// Best-matching entry reference with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbMatch {
    pub id: Option<String>,
    pub score: f64,
}

/// Lowercased token set; tokens shorter than three characters carry almost no
/// signal and are dropped.
fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(str::to_lowercase)
        .filter(|t| t.len() >= 3)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}

/// Weighted similarity of one entry against the pre-tokenized query.
fn entry_score(entry: &Value, query_tokens: &HashSet<String>) -> f64 {
    let mut weighted = 0.0;
    let mut weight_total = 0.0;

    for (field, weight) in FIELD_WEIGHTS {
        let Some(text) = doc::str_field(entry, field) else {
            continue;
        };
        weight_total += weight;
        weighted += weight * jaccard(&tokenize(&text), query_tokens);
    }

    if weight_total > 0.0 {
        weighted / weight_total
    } else {
        0.0
    }
}

fn entry_id(entry: &Value) -> Option<String> {
    ID_FIELDS.iter().find_map(|f| doc::str_field(entry, f))
}

/// Flatten a loaded knowledge base into its entry documents. Accepts a bare
/// array, an object with an `entries`/`articles`/`items` array, or a single
/// entry object.
pub fn flatten_entries(kb: &Value) -> Vec<&Value> {
    if let Some(arr) = kb.as_array() {
        return arr.iter().collect();
    }
    for field in ["entries", "articles", "items"] {
        let list = doc::list_field(kb, field);
        if !list.is_empty() {
            return list.iter().collect();
        }
    }
    if kb.is_object() {
        return vec![kb];
    }
    Vec::new()
}

/// Find the best-scoring entry for the query text. Ties keep the first entry
/// scanned, so results are stable for a fixed knowledge base ordering.
/// Entries below `min_score` are reported with `id: None` so callers can see
/// that retrieval ran but found nothing relevant.
pub fn best_match(entries: &[&Value], query: &str, min_score: f64) -> KbMatch {
    let query_tokens = tokenize(query);

    let mut best_id = None;
    let mut best_score = 0.0_f64;
    for entry in entries {
        let score = entry_score(entry, &query_tokens);
        if score > best_score {
            best_score = score;
            best_id = entry_id(entry);
        }
    }

    debug!(score = best_score, "knowledge base scan complete");
    if best_score >= min_score {
        KbMatch { id: best_id, score: round4(best_score) }
    } else {
        KbMatch { id: None, score: round4(best_score) }
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries(kb: &Value) -> Vec<&Value> {
        flatten_entries(kb)
    }

    #[test]
    fn test_identical_text_scores_one() {
        let kb = json!([{ "id": "KB-1", "title": "database connection pool exhausted" }]);
        let m = best_match(&entries(&kb), "database connection pool exhausted", 0.25);
        assert_eq!(m.id.as_deref(), Some("KB-1"));
        assert!((m.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_text_scores_zero() {
        let kb = json!([{ "id": "KB-1", "title": "printer driver crash loop" }]);
        let m = best_match(&entries(&kb), "kubernetes ingress timeout cascade", 0.25);
        assert!(m.id.is_none());
        assert_eq!(m.score, 0.0);
    }

    #[test]
    fn test_high_weight_field_dominates() {
        // Both entries carry the same two fields; the query matches one
        // entry on content only and the other on title only. Normalization
        // is over the same present weights, so the title weight decides.
        let kb = json!([
            { "id": "content-hit", "title": "printer driver crash loop",
              "content": "disk latency spike raid controller" },
            { "id": "title-hit", "title": "disk latency spike raid controller",
              "content": "printer driver crash loop" },
        ]);
        let m = best_match(&entries(&kb), "disk latency spike raid controller", 0.25);
        assert_eq!(m.id.as_deref(), Some("title-hit"));
    }

    #[test]
    fn test_single_field_entries_tie_at_full_overlap() {
        // With per-entry normalization a perfect single-field match scores
        // 1.0 whatever the field's weight; the first entry scanned wins.
        let kb = json!([
            { "id": "content-only", "content": "disk latency spike raid controller" },
            { "id": "title-only", "title": "disk latency spike raid controller" },
        ]);
        let m = best_match(&entries(&kb), "disk latency spike raid controller", 0.25);
        assert_eq!(m.id.as_deref(), Some("content-only"));
        assert!((m.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_fields_do_not_penalize() {
        // One entry has only a title, the other has a title plus an empty
        // description that would drag the normalized score down if counted.
        let kb = json!([
            { "id": "sparse", "title": "network packet loss on uplink" },
            { "id": "padded", "title": "network packet loss on uplink", "description": "unrelated words entirely here now" },
        ]);
        let m = best_match(&entries(&kb), "network packet loss on uplink", 0.25);
        assert_eq!(m.id.as_deref(), Some("sparse"));
    }

    #[test]
    fn test_below_threshold_reports_score_without_id() {
        let kb = json!([{ "id": "KB-9", "title": "certificate expiry on load balancer frontend" }]);
        let m = best_match(&entries(&kb), "certificate problems somewhere", 0.5);
        assert!(m.id.is_none());
        assert!(m.score > 0.0);
    }

    #[test]
    fn test_short_tokens_dropped() {
        assert!(!tokenize("db is up ok").contains("db"));
        assert!(tokenize("memory leak").contains("memory"));
    }

    #[test]
    fn test_flatten_shapes() {
        let arr = json!([{ "id": "a" }, { "id": "b" }]);
        assert_eq!(flatten_entries(&arr).len(), 2);

        let wrapped = json!({ "entries": [{ "id": "a" }] });
        assert_eq!(flatten_entries(&wrapped).len(), 1);

        let single = json!({ "id": "a", "title": "t" });
        assert_eq!(flatten_entries(&single).len(), 1);

        assert!(flatten_entries(&json!("nope")).is_empty());
    }

    #[test]
    fn test_id_field_aliases() {
        let kb = json!([{ "entry_id": "E-7", "title": "vpn tunnel flapping between sites" }]);
        let m = best_match(&entries(&kb), "vpn tunnel flapping between sites", 0.25);
        assert_eq!(m.id.as_deref(), Some("E-7"));

        let kb2 = json!([{ "kb_id": 42, "title": "vpn tunnel flapping between sites" }]);
        let m2 = best_match(&entries(&kb2), "vpn tunnel flapping between sites", 0.25);
        assert_eq!(m2.id.as_deref(), Some("42"));
    }

    #[test]
    fn test_first_entry_wins_ties() {
        let kb = json!([
            { "id": "first", "title": "dns resolution failure" },
            { "id": "second", "title": "dns resolution failure" },
        ]);
        let m = best_match(&entries(&kb), "dns resolution failure", 0.25);
        assert_eq!(m.id.as_deref(), Some("first"));
    }
}
