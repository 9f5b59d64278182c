use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use alertmedic::cache::{CacheStore, SqliteCache};
use alertmedic::config::AlertmedicConfig;
use alertmedic::run::PipelineReport;

#[derive(Parser)]
#[command(
    name = "alertmedic",
    about = "Alert correlation and root-cause analysis for monitoring incidents",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one full analysis over live sources and deliver the report
    Run {
        /// Ticket to update with the resolution, overriding the config
        #[arg(long)]
        request_id: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Run the pipeline against built-in fixtures (no network, no credentials)
    Demo {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Manage the TTL cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete expired entries
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => AlertmedicConfig::load(path)?,
        None => AlertmedicConfig::load_or_default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.logging.level.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { request_id, json } => {
            let mut cfg = cfg;
            if let Some(id) = request_id {
                cfg.delivery.request_id = id;
            }
            tracing::info!("Starting analysis run");
            let report = alertmedic::run_once(&cfg).await?;
            print_report(&report, json)?;
        }
        Commands::Demo { json } => {
            tracing::info!("Starting demo run against built-in fixtures");
            let now = chrono::Utc::now().timestamp();
            let deps = alertmedic::demo::demo_deps(now);
            let report = alertmedic::run::run_pipeline(&deps, &cfg).await;
            print_report(&report, json)?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Sweep => {
                let cache = SqliteCache::open(&cfg.cache.db_path)?;
                let removed = cache.sweep_expired()?;
                println!("Removed {} expired cache entries.", removed);
            }
        },
    }

    Ok(())
}

fn print_report(report: &PipelineReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("\n=== Alertmedic RCA Report ({}) ===", report.run_id);
    println!(
        "Groups: {}   Enriched hosts: {}",
        report.groups.len(),
        report.enrichments.len()
    );
    println!(
        "Calibrated confidence: {:.2} (raw {:.2}, completeness {:.2})",
        report.metrics.calibrated, report.metrics.llm_conf, report.metrics.completeness
    );
    if report.decision.guardrail_mode {
        println!("Low-confidence guardrail: ENGAGED");
    }
    println!();
    println!("{}", report.resolution_md);
    println!("=========================================\n");
    Ok(())
}
