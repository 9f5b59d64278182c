//! Rendering of the final decision into delivery formats: a 5W1H markdown
//! document for ticket resolutions and a short plain-text chat summary.

use std::fmt::Write as _;

use crate::confidence::Decision;
use crate::correlate::CorrelationGroup;
use crate::enrich::EnrichmentResult;
use crate::kb::KbMatch;
use crate::timeparse;

fn line(out: &mut String, label: &str, value: Option<&str>) {
    let _ = writeln!(out, "- **{label}:** {}", value.unwrap_or("unknown"));
}

/// Render the ITSM 5W1H markdown block for ticket resolution text.
pub fn render_5w1h(decision: &Decision) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## ITSM RCA (5W1H)");
    let _ = writeln!(out);

    let w = &decision.five_w1h;
    line(&mut out, "Who", w.who.as_deref());
    line(&mut out, "What", w.what.as_deref());
    line(&mut out, "When", w.when.as_deref());
    line(&mut out, "Where", w.r#where.as_deref());
    line(&mut out, "Why", w.why.as_deref());
    line(&mut out, "How", w.how.as_deref());

    let _ = writeln!(out);
    let _ = writeln!(out, "**Root cause:** {}", decision.root_cause);
    let _ = writeln!(
        out,
        "**Confidence:** {:.2}{}",
        decision.confidence_calibrated,
        if decision.guardrail_mode { " (low-confidence guardrail engaged)" } else { "" }
    );
    if let Some(impact) = &decision.impact {
        let _ = writeln!(out, "**Impact:** {impact}");
    }

    if !decision.evidence.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "### Evidence");
        for item in &decision.evidence {
            let _ = writeln!(out, "- {item}");
        }
    }

    if !decision.missing_data.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "### Missing data");
        for item in &decision.missing_data {
            let _ = writeln!(out, "- {item}");
        }
    }

    if !decision.immediate_actions.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "### Immediate actions");
        for item in &decision.immediate_actions {
            let _ = writeln!(out, "- {item}");
        }
    }

    if !decision.preventive_actions.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "### Preventive actions");
        for item in &decision.preventive_actions {
            let _ = writeln!(out, "- {item}");
        }
    }

    out
}

/// Short chat-channel summary of one run.
pub fn render_chat_summary(
    decision: &Decision,
    groups: &[CorrelationGroup],
    enrichments: &[EnrichmentResult],
    kb_match: Option<&KbMatch>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "RCA run complete: {} correlation group(s).", groups.len());
    if let Some(earliest) = groups.iter().map(|g| g.incident_ts).min() {
        let _ = writeln!(out, "Earliest incident: {}", timeparse::readable(earliest));
    }
    let _ = writeln!(out, "Root cause: {}", decision.root_cause);
    let _ = writeln!(
        out,
        "Calibrated confidence: {:.2}{}",
        decision.confidence_calibrated,
        if decision.guardrail_mode { " [guardrail]" } else { "" }
    );

    let mut anomalies: Vec<(&str, f64)> = enrichments
        .iter()
        .flat_map(|e| e.anomalies.iter().map(|m| (m.name.as_str(), m.anomaly_score)))
        .collect();
    anomalies.sort_by(|a, b| b.1.total_cmp(&a.1));
    if !anomalies.is_empty() {
        let top: Vec<String> = anomalies
            .iter()
            .take(3)
            .map(|(name, score)| format!("{name} ({score:.2})"))
            .collect();
        let _ = writeln!(out, "Top anomalies: {}", top.join(", "));
    }

    if let Some(m) = kb_match {
        match &m.id {
            Some(id) => {
                let _ = writeln!(out, "Related KB entry: {id} (score {:.2})", m.score);
            }
            None => {
                let _ = writeln!(out, "No relevant KB entry (best score {:.2}).", m.score);
            }
        }
    }

    out
}
