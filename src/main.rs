//! AccessReview - scheduled cloud access review
//!
//! Runs one review: collects evidence, writes the CSV artifact, generates
//! the governance narrative and delivers both.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (configuration, artifact write failure, etc.)
//!   2 - Review completed but delivery failed

use accessreview::cli::Args;
use accessreview::collectors::registry;
use accessreview::config::{Config, DeliveryKind, CONFIG_FILE};
use accessreview::delivery::{
    DeliveryCoordinator, DeliveryTransport, DirectoryTransport, WebhookTransport,
};
use accessreview::models::{NarrativeOrigin, Severity};
use accessreview::narrative::{NarrativeEngine, OllamaClient};
use accessreview::source::SnapshotSource;
use accessreview::Pipeline;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("AccessReview v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_review(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Review failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .accessreview.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set the snapshot directory, model and delivery target.");
    Ok(())
}

/// Initialize logging based on verbosity settings; `RUST_LOG` takes precedence.
fn init_logging(args: &Args) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(args.log_level()).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run one review. Returns the exit code (0 or 2).
async fn run_review(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    println!("📥 Collecting evidence");
    println!("   Account: {}", config.collection.account);
    println!("   Snapshots: {}", config.collection.snapshot_dir.display());
    if config.model.enabled {
        println!("   Model: {} ({})", config.model.name, config.model.ollama_url);
    } else {
        println!("   Model: disabled (deterministic narrative)");
    }

    let pipeline = build_pipeline(&config)?;

    let spinner = if args.quiet {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb.set_message("Running access review...");
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    };

    let result = pipeline.run_once().await;

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let outcome = result.context("Review run failed")?;
    let report = &outcome.report;

    println!("\n📊 Review Summary:");
    println!("   Findings: {}", report.findings().len());
    println!(
        "   - 🔴 Critical: {} | 🟠 High: {} | 🟡 Medium: {} | 🟢 Low: {} | ℹ️  Info: {}",
        report.count_by_severity(Severity::Critical),
        report.count_by_severity(Severity::High),
        report.count_by_severity(Severity::Medium),
        report.count_by_severity(Severity::Low),
        report.count_by_severity(Severity::Info)
    );
    for (source, err) in report.collection_errors() {
        println!("   ⚠️  {}: {} ({})", source, err.kind, err.detail);
    }
    match outcome.narrative.origin() {
        NarrativeOrigin::Model => println!("   Narrative: generated by {}", config.model.name),
        NarrativeOrigin::Fallback => println!("   Narrative: deterministic fallback"),
    }
    println!("   Artifact: {}", outcome.artifact_path.display());
    println!("   Duration: {:.1}s", start_time.elapsed().as_secs_f64());

    let exit_code = outcome.exit_code();
    if exit_code == 0 {
        println!("\n✅ Review complete and delivered.");
    } else {
        for err in &outcome.delivery.errors {
            eprintln!("   ⛔ {}", err);
        }
        eprintln!("\n⛔ Review complete but delivery failed (exit code 2).");
    }

    Ok(exit_code)
}

/// Wire collectors, narrative engine and delivery from configuration.
fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let source = Arc::new(SnapshotSource::new(&config.collection.snapshot_dir));
    let collectors = registry(source, &config.collection.sources);

    let engine_config = config.engine_config();
    let engine = if config.model.enabled {
        let client = OllamaClient::new(
            &config.model.ollama_url,
            &config.model.name,
            engine_config.call_timeout,
        )?;
        NarrativeEngine::new(Arc::new(client), engine_config)
    } else {
        NarrativeEngine::fallback_only(engine_config)
    };

    let delivery = &config.delivery;
    let transport: Arc<dyn DeliveryTransport> = match delivery.kind {
        DeliveryKind::Directory => Arc::new(DirectoryTransport::new(&delivery.outbox_dir)),
        DeliveryKind::Webhook => {
            let upload_base = delivery
                .upload_base_url
                .as_deref()
                .context("delivery.upload_base_url is required for webhook delivery")?;
            let webhook_url = delivery
                .webhook_url
                .as_deref()
                .context("delivery.webhook_url is required for webhook delivery")?;
            Arc::new(WebhookTransport::new(
                upload_base,
                webhook_url,
                Duration::from_secs(delivery.timeout_seconds),
            )?)
        }
    };

    Ok(Pipeline::new(
        collectors,
        engine,
        DeliveryCoordinator::new(transport, delivery.recipient.clone()),
        config.run_settings(),
    ))
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
