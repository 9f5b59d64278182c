//! TOML configuration for the alertmedic pipeline.
//!
//! Layered model: `ALERTMEDIC_CONFIG` env override for the file path, a
//! standard system location, then compiled-in defaults. The core pipeline
//! receives this value object; it never reads the environment itself.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Root configuration for the alertmedic process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertmedicConfig {
    pub zabbix: ZabbixConfig,
    pub uptimerobot: UptimeRobotConfig,
    pub reasoning: ReasoningConfig,
    pub delivery: DeliveryConfig,
    pub pipeline: PipelineConfig,
    pub concurrency: ConcurrencyConfig,
    pub cache: CacheConfig,
    pub kb: KbConfig,
    pub logging: LoggingConfig,
}

impl AlertmedicConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in the `ALERTMEDIC_CONFIG` environment variable.
    /// 2. `/etc/alertmedic/alertmedic.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("ALERTMEDIC_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "ALERTMEDIC_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/alertmedic/alertmedic.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Problem-tracking monitoring server (Zabbix JSON-RPC).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZabbixConfig {
    /// Base URL of the Zabbix frontend (no trailing slash).
    pub url: String,
    /// API token. Empty means this source is disabled and contributes no events.
    pub token: String,
    pub timeout_secs: u64,
}

impl Default for ZabbixConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

/// External uptime-checking service (UptimeRobot-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UptimeRobotConfig {
    /// API key. Empty disables the source.
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for UptimeRobotConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

/// OpenAI-compatible reasoning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Generous by default; small local models are slow.
    pub timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            api_key: String::new(),
            model: "mistral".to_string(),
            timeout_secs: 120,
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Outbound delivery endpoints (chat webhook + ticketing resolution update).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Incoming-webhook URL for the chat channel. Empty skips chat delivery.
    pub chat_webhook_url: String,
    /// Ticketing system base URL. Empty skips ticket updates.
    pub ticket_url: String,
    pub technician_key: String,
    /// Default ticket to update when the caller supplies none.
    pub request_id: String,
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chat_webhook_url: String::new(),
            ticket_url: String::new(),
            technician_key: String::new(),
            request_id: String::new(),
            timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline tunables
// ---------------------------------------------------------------------------

/// Correlation, enrichment, and calibration tunables.
///
/// The anomaly weighting (movement/volatility) and the calibration weights
/// have no documented derivation; they are exposed here as tunables pending
/// review rather than baked in as constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum age (minutes) of an incident event still eligible for correlation.
    pub lookback_minutes: i64,
    /// Symmetric correlation window (minutes) around each incident event.
    pub window_minutes: i64,
    /// Upper bound on candidate metrics queried per host.
    pub max_candidate_metrics: usize,
    /// How many ranked metric summaries an enrichment keeps.
    pub top_metrics: usize,
    /// Anomaly score above which a metric counts as a significant anomaly.
    pub anomaly_significance: f64,
    pub movement_weight: f64,
    pub volatility_weight: f64,
    pub weight_llm_conf: f64,
    pub weight_anomaly: f64,
    pub weight_corr_density: f64,
    pub weight_completeness: f64,
    /// Guardrail engages below either threshold.
    pub guardrail_min_confidence: f64,
    pub guardrail_min_completeness: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookback_minutes: 30,
            window_minutes: 10,
            max_candidate_metrics: 15,
            top_metrics: 8,
            anomaly_significance: 0.5,
            movement_weight: 0.6,
            volatility_weight: 0.4,
            weight_llm_conf: 0.40,
            weight_anomaly: 0.25,
            weight_corr_density: 0.20,
            weight_completeness: 0.15,
            guardrail_min_confidence: 0.45,
            guardrail_min_completeness: 0.35,
        }
    }
}

/// Independent permit-pool sizes per upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub incident: usize,
    pub uptime: usize,
    /// The reasoning service rarely tolerates concurrent load; keep at 1
    /// unless the upstream is known to handle more.
    pub reasoning: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            incident: 5,
            uptime: 3,
            reasoning: 1,
        }
    }
}

/// TTL cache location and per-namespace TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub db_path: String,
    pub ttl_incident_secs: i64,
    pub ttl_uptime_secs: i64,
    pub ttl_reasoning_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: "data/alertmedic_cache.db".to_string(),
            ttl_incident_secs: 120,
            ttl_uptime_secs: 180,
            ttl_reasoning_secs: 86_400,
        }
    }
}

/// Knowledge-base matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KbConfig {
    /// Path to a JSON file with knowledge-base entries. Empty disables matching.
    pub path: String,
    /// Best match below this score is reported with a null id.
    pub min_score: f64,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            min_score: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AlertmedicConfig::default();

        assert_eq!(cfg.pipeline.lookback_minutes, 30);
        assert_eq!(cfg.pipeline.window_minutes, 10);
        assert_eq!(cfg.pipeline.max_candidate_metrics, 15);
        assert!((cfg.pipeline.movement_weight - 0.6).abs() < 1e-9);
        assert!((cfg.pipeline.volatility_weight - 0.4).abs() < 1e-9);
        assert!((cfg.pipeline.guardrail_min_confidence - 0.45).abs() < 1e-9);
        assert!((cfg.pipeline.guardrail_min_completeness - 0.35).abs() < 1e-9);

        // Calibration weights must sum to 1 so calibrated stays in [0,1].
        let sum = cfg.pipeline.weight_llm_conf
            + cfg.pipeline.weight_anomaly
            + cfg.pipeline.weight_corr_density
            + cfg.pipeline.weight_completeness;
        assert!((sum - 1.0).abs() < 1e-9);

        assert_eq!(cfg.concurrency.incident, 5);
        assert_eq!(cfg.concurrency.uptime, 3);
        assert_eq!(cfg.concurrency.reasoning, 1);

        assert_eq!(cfg.cache.ttl_incident_secs, 120);
        assert_eq!(cfg.cache.ttl_uptime_secs, 180);
        assert_eq!(cfg.cache.ttl_reasoning_secs, 86_400);

        assert!(cfg.zabbix.url.is_empty());
        assert_eq!(cfg.reasoning.model, "mistral");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[zabbix]
url = "https://zbx.example.internal"
token = "abc123"

[pipeline]
window_minutes = 5
"#;
        let cfg: AlertmedicConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.zabbix.url, "https://zbx.example.internal");
        assert_eq!(cfg.pipeline.window_minutes, 5);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.pipeline.lookback_minutes, 30);
        assert_eq!(cfg.concurrency.reasoning, 1);
        assert_eq!(cfg.uptimerobot.timeout_secs, 30);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: AlertmedicConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.pipeline.top_metrics, 8);
        assert_eq!(cfg.kb.min_score, 0.25);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("alertmedic.toml");
        std::fs::write(
            &path,
            r#"
[reasoning]
model = "gpt-4o-mini"
"#,
        )
        .unwrap();

        let cfg = AlertmedicConfig::load(&path).unwrap();
        assert_eq!(cfg.reasoning.model, "gpt-4o-mini");
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(AlertmedicConfig::load(Path::new("/nonexistent/alertmedic.toml")).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = AlertmedicConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: AlertmedicConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(cfg.pipeline.window_minutes, roundtripped.pipeline.window_minutes);
        assert_eq!(cfg.cache.db_path, roundtripped.cache.db_path);
    }
}
