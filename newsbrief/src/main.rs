/*
newsbrief - single-run main.rs
Builds today's briefing once and exits; scheduling is left to cron or a systemd timer.
*/

use clap::Parser;
use common::{Config, ConfigError, Credentials, SourceConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use newsbrief::delivery::DeliveryStatus;
use newsbrief::error::PipelineError;
use newsbrief::pipeline::{local_now, resolve_timezone, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "newsbrief", about = "Search, summarize and deliver today's news briefing")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the category/source list (overrides run.sources_path)
    #[arg(long, value_name = "FILE")]
    sources: Option<PathBuf>,

    /// Root directory for news/<date>/ folders (overrides run.output_dir)
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Always write a timestamped file instead of the canonical daily name
    #[arg(long)]
    new_file: bool,

    /// Save locally only, even when messaging is configured
    #[arg(long)]
    no_deliver: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Secrets usually live in .env next to the config
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    match run(args).await {
        Ok(status) => {
            info!(%status, "done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "briefing run failed");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: Args) -> Result<DeliveryStatus, PipelineError> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = match args.config {
        Some(p) if !p.exists() => {
            return Err(ConfigError::Invalid(format!("config file not found: {}", p.display())).into());
        }
        Some(p) => Some(p),
        None => Some(PathBuf::from("config.toml")).filter(|p| p.exists()),
    };

    let mut config = Config::load_with_defaults(
        Some(default_path.as_path()).filter(|p| p.exists()),
        override_path.as_deref(),
    )
    .await?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let sources_path = args.sources.unwrap_or_else(|| config.run.sources_path());
    let sources = SourceConfig::from_file(&sources_path).await?;
    info!(
        path = %sources_path.display(),
        categories = sources.categories.len(),
        "sources loaded"
    );

    if args.no_deliver && config.active_delivery().is_some() {
        warn!("--no-deliver set; briefing will only be saved locally");
        config = config.local_only();
    }

    let credentials = Credentials::from_env(&config)?;
    let tz = resolve_timezone(&config.run, |name| std::env::var(name).ok())?;
    let output_dir = args.output_dir.unwrap_or_else(|| config.run.output_dir());

    let pipeline = Pipeline::from_config(&config, sources, &credentials, output_dir, !args.no_deliver)?;

    let now = local_now(tz);
    info!(timezone = %tz, local_time = %now.format("%Y-%m-%d %H:%M"), "starting briefing run");

    let report = pipeline.run(now, args.new_file).await?;
    for warning in &report.record.warnings {
        warn!(%warning, "delivery warning");
    }
    if !report.degraded.is_empty() {
        let names: Vec<&str> = report.degraded.iter().map(|(name, _)| name.as_str()).collect();
        warn!(categories = ?names, "briefing saved with missing categories");
    }
    info!(path = %report.record.path.display(), run_id = %report.run_id, "briefing written");

    Ok(report.record.status)
}
