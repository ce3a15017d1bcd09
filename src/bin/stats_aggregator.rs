use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use telemetry_pipeline::config::{parse_store_url, AggregatorConfig};
use telemetry_pipeline::{logging, shutdown, Aggregator};

/// Follow the events log and publish rolling per-type counts to the stats log.
#[derive(Parser)]
#[command(name = "stats-aggregator")]
struct Args {
    /// Event store base URL (overrides STORE_URL)
    #[arg(long)]
    store_url: Option<String>,
    /// Checkpoint file (overrides CHECKPOINT_PATH)
    #[arg(long)]
    checkpoint: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();
    let args = Args::parse();

    logging::init("telemetry_pipeline=debug");

    let mut config = AggregatorConfig::from_env()?;
    if let Some(url) = args.store_url.as_deref() {
        config.store.base_url = parse_store_url(url)?;
    }
    if args.checkpoint.is_some() {
        config.checkpoint_path = args.checkpoint;
    }

    info!(
        source = %config.source_log,
        sink = %config.sink_log,
        "Starting stats aggregator..."
    );
    let aggregator = Aggregator::prepare(config).await?;
    info!(position = %aggregator.cursor(), "Aggregator ready");

    let snapshot = aggregator.run(shutdown::shutdown_signal()).await?;
    info!(types = snapshot.len(), "Aggregator stopped");

    Ok(())
}
