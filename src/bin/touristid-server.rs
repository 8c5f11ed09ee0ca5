#![forbid(unsafe_code)]
//! TouristID registration server

use chrono::Utc;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use touristid::api::{run_api_server, AppState};
use touristid::blockchain::Ledger;
use touristid::config::{load_config, DEFAULT_CONFIG_PATH};
use touristid::credential::QrPngEncoder;
use touristid::persistence::Database;
use touristid::pipeline::RegistrationPipeline;

#[derive(Parser, Debug)]
#[command(name = "touristid-server", about = "Tourist registration service")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Port to listen on (overrides config and PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut config = load_config(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if !config.auth.is_configured() {
        tracing::warn!("ADMIN_USER/ADMIN_PASS not set; read-back endpoints will reject every request");
    }

    let store = Database::open(&config.database.path)?;
    tracing::info!(path = %config.database.path, "record store opened");

    let ledger = Arc::new(Ledger::with_scheme(config.ledger.hash_scheme));
    tracing::info!(scheme = ?config.ledger.hash_scheme, blocks = ledger.len(), "ledger initialized");

    let pipeline = Arc::new(RegistrationPipeline::with_config(
        Arc::new(store),
        ledger,
        config.storage.pipeline_config(),
    ));

    // Everything pending at startup predates this ledger, so the grace
    // period is skipped.
    let horizon = chrono::Duration::from_std(config.storage.pipeline_config().reconcile_grace)
        .ok()
        .and_then(|grace| Utc::now().checked_add_signed(grace))
        .ok_or("storage.reconcile_grace_secs is out of range")?;
    let report = pipeline.reconcile(horizon).await?;
    if !report.orphaned.is_empty() {
        tracing::warn!(count = report.orphaned.len(), "orphaned stale pending records");
    }

    let encoder = Arc::new(QrPngEncoder::new(config.credential.image_size));
    let state = AppState::new(pipeline, encoder, config.auth.clone());

    let ip: IpAddr = config.server.bind.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    run_api_server(state, addr).await
}
