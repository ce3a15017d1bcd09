use clap::Parser;
use tracing::{error, info};

use telemetry_pipeline::config::{parse_store_url, GatewayConfig};
use telemetry_pipeline::{gateway, logging, shutdown};

/// Accept web requests and forward them as events to the store.
#[derive(Parser)]
#[command(name = "event-gateway")]
struct Args {
    /// Listen port (overrides GATEWAY_PORT)
    #[arg(long)]
    port: Option<u16>,
    /// Event store base URL (overrides STORE_URL)
    #[arg(long)]
    store_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();
    let args = Args::parse();

    logging::init("telemetry_pipeline=debug,tower_http=debug");

    let mut config = GatewayConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = args.store_url.as_deref() {
        config.store.base_url = parse_store_url(url)?;
    }

    info!("Starting event gateway...");
    let port = config.port;
    let state = gateway::prepare(config).await?;

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on http://{}", addr);

    if let Err(e) = gateway::serve(listener, state, shutdown::shutdown_signal()).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Gateway stopped");
    Ok(())
}
