//! NapPing - Main Entry Point

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use napping::{init_logging, run, trace, AppConfig, RunOptions};
use tracing::{info, Level};

/// Replay an eye-state trace through the sleep detector
#[derive(Debug, Parser)]
#[command(name = "napping", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "NAPPING_CONFIG")]
    config: Option<PathBuf>,

    /// JSON-lines classifier trace to replay
    #[arg(short, long)]
    trace: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Maximum log level
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    /// Log as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level, args.json_logs)?;

    info!("=== NapPing v{} ===", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(args.config.as_deref())?;
    let script = match &args.trace {
        Some(path) => trace::load_trace(path)?,
        None => Vec::new(),
    };
    info!("Replaying {} classifier outcomes", script.len());

    let duration = args.duration_secs.map(Duration::from_secs);
    let options = RunOptions {
        config,
        script,
        duration,
        stop_when_exhausted: duration.is_none() && args.trace.is_some(),
    };

    run(options, std::io::stdout()).await?;
    Ok(())
}
