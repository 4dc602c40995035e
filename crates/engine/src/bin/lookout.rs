//! lookout: polls the search backend on a fixed interval and alerts when
//! a rule's condition is met.
//!
//! Startup: load `.env`, build the config (YAML file or environment), load
//! every rule under the rules directory, resolve alert channels, then hand
//! everything to the orchestrator until SIGINT/SIGTERM.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};

use lookout_core::config::{load_dotenv, Config};
use lookout_engine::alerting::ChannelFactory;
use lookout_engine::{shutdown, OpenSearchClient, Orchestrator, RuleOutcome};
use lookout_rules::{LoadStatus, LoadedRules, RuleLoader};

// ── CLI ─────────────────────────────────────────────────────────────

/// Rule-driven monitoring for OpenSearch indices.
#[derive(Parser, Debug)]
#[command(name = "lookout", version, about)]
struct Cli {
    /// YAML config file. Without it, settings come from the environment.
    #[arg(long, env = "LOOKOUT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the rules directory from the config.
    #[arg(long, env = "RULES_DIR")]
    rules_dir: Option<PathBuf>,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// Load and check the rules, print the result per file, then exit.
    #[arg(long, conflicts_with = "once")]
    validate: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_yaml_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => Config::from_env(),
    };
    if let Some(dir) = &cli.rules_dir {
        config.engine.rules_dir = dir.clone();
    }
    Ok(config)
}

fn print_validation(loaded: &LoadedRules) {
    for result in &loaded.results {
        let path = result.path.display();
        match &result.status {
            LoadStatus::Loaded { rule_name } => println!("ok      {}  ({})", path, rule_name),
            LoadStatus::Skipped { reason } => println!("skipped {}  ({})", path, reason),
            LoadStatus::Failed { error } => println!("FAILED  {}  {}", path, error),
        }
    }
    println!(
        "{} loaded, {} failed",
        loaded.rules.len(),
        loaded.failures().count()
    );
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    config.log_summary();
    let settings = config.engine_settings()?;

    let loader = RuleLoader::with_builtin(&config.engine.rules_dir);
    let loaded = loader
        .load_all()
        .with_context(|| format!("loading rules from {}", loader.rules_dir().display()))?;

    if cli.validate {
        print_validation(&loaded);
        if loaded.failures().next().is_some() {
            std::process::exit(1);
        }
        return Ok(());
    }

    for failure in loaded.failures() {
        warn!(path = %failure.path.display(), status = ?failure.status, "rule not loaded");
    }
    if loaded.rules.is_empty() {
        warn!(rules_dir = %loader.rules_dir().display(), "no rules loaded; cycles will be empty");
    }

    let backend = OpenSearchClient::from_config(&config.opensearch, settings.query_timeout)?;
    let dispatcher = ChannelFactory::new(&config.smtp).dispatcher(&loaded.rules);
    let mut orchestrator =
        Orchestrator::new(Box::new(backend), loaded.rules, dispatcher, settings);

    if cli.once {
        let report = orchestrator.run_cycle(Utc::now()).await;
        report.log();
        for (rule, outcome) in &report.outcomes {
            if let RuleOutcome::Skipped { stage, error } = outcome {
                error!(rule = %rule, %stage, error = %error, "rule skipped");
            }
        }
        return Ok(());
    }

    info!(rules = orchestrator.rules().len(), "lookout starting");
    orchestrator.run(shutdown::on_os_signal()).await;
    info!("lookout exited cleanly");
    Ok(())
}
