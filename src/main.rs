use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use diamond_parser::app::ports::Locator;
use diamond_parser::config::{self, AppConfig};
use diamond_parser::constants::{LOGS_DIR, OUTPUT_DATA_DIR, PROVENANCE_FILE, RAW_DATA_DIR};
use diamond_parser::domain::PayloadKind;
use diamond_parser::identity::Uuid5IdGenerator;
use diamond_parser::infra::file_store::FsFileStore;
use diamond_parser::infra::provenance::JsonlProvenanceRecorder;
use diamond_parser::logging;
use diamond_parser::pipeline::{GameFlowManager, Normalizer, RunOutcome, RunStatus, SinkRegistry};

#[derive(Parser)]
#[command(name = "diamond_parser")]
#[command(about = "Normalize baseball game logs and export them to several formats")]
#[command(version)]
struct Cli {
    /// Path to the settings file
    #[arg(long, global = true, default_value = "settings.toml")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize one game log and export it
    Run {
        /// Log file name inside raw_data_dir, or an absolute path
        #[arg(long)]
        source: String,
        /// Formats to export (comma-separated). Available: json, csv, sqlite
        #[arg(long, default_value = "json,csv")]
        formats: String,
    },
    /// List the registered export formats
    Sinks,
    /// Print the resolved configuration
    ShowConfig,
}

fn source_locator(source: &str) -> Locator {
    if Path::new(source).is_absolute() {
        Locator::path(source)
    } else {
        Locator::keyed(RAW_DATA_DIR, source)
    }
}

fn print_outcome(outcome: &RunOutcome) {
    println!("\n📊 Run outcome: {}", outcome.status.as_str());
    if let Some(phase) = outcome.failed_phase {
        println!("   Failed during: {}", phase);
    }
    if let Some(record) = &outcome.record {
        println!("   Tokens: {}", record.tokens().len());
        println!("   Events: {}", record.events().len());
        for warning in record.warnings() {
            println!("   ⚠️  {}", warning);
        }
    }
    for artifact in outcome.artifacts() {
        println!("   ✅ {} -> {} ({} bytes)", artifact.format, artifact.path.display(), artifact.bytes_written);
    }
    for (format, err) in outcome.failed_formats() {
        println!("   ❌ {}: {}", format, err);
    }
    if outcome.report.is_none() {
        for err in &outcome.errors {
            println!("   ❌ {}", err);
        }
    }
    for warning in &outcome.warnings {
        println!("   ⚠️  {}", warning);
    }
}

async fn run(config: Arc<AppConfig>, source: &str, formats: &str) -> anyhow::Result<RunStatus> {
    let ids = Arc::new(Uuid5IdGenerator::new(config.app_name()));
    let normalizer = Arc::new(Normalizer::game_log(ids));
    normalizer
        .validate_chain(PayloadKind::Text)
        .context("stage chain is misconfigured")?;

    let files = Arc::new(FsFileStore::new(config.clone()));
    let sinks = Arc::new(SinkRegistry::with_default_sinks());
    let mut manager = GameFlowManager::from_config(&config, files, normalizer, sinks)?;

    let ledger_dir = config
        .get_path(OUTPUT_DATA_DIR)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| manager.output_dir().clone());
    manager = manager.with_provenance(Arc::new(JsonlProvenanceRecorder::new(ledger_dir.join(PROVENANCE_FILE))));

    let formats: Vec<String> = formats
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping before the next stage or sink");
            on_signal.cancel();
        }
    });

    println!("🚀 Running {} -> [{}]", source, formats.join(", "));
    let outcome = manager
        .run_with_cancel(&source_locator(source), &formats, &cancel)
        .await;
    print_outcome(&outcome);
    Ok(outcome.status)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Commands::Sinks = cli.command {
        for format in SinkRegistry::with_default_sinks().registered_formats() {
            println!("{}", format);
        }
        return Ok(());
    }

    let loaded = AppConfig::load(&cli.settings)
        .with_context(|| format!("failed to load settings from {}", cli.settings.display()))?;
    let config = config::install(loaded);

    let logs_dir = config
        .get_path(LOGS_DIR)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| PathBuf::from("logs"));
    let guard = logging::init_logging(config.logging(), &logs_dir);
    info!("{} v{} started", config.app_name(), config.app_version());

    match cli.command {
        Commands::Run { source, formats } => {
            let status = run(config, &source, &formats).await?;
            let code = match status {
                RunStatus::Success => 0,
                RunStatus::Partial => 2,
                RunStatus::Failure => 1,
            };
            if code != 0 {
                drop(guard);
                std::process::exit(code);
            }
        }
        Commands::ShowConfig => {
            println!("{} v{}", config.app_name(), config.app_version());
            for (key, path) in config.paths() {
                println!("  {:<20} {}", key, path.display());
            }
        }
        Commands::Sinks => {}
    }
    Ok(())
}
