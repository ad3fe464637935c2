use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use intercom_engine::{CatalogFetcher, EngineConfig, SessionManager};
use intercom_server::ServerConfig;
use intercom_store::Database;
use intercom_telemetry::TelemetryConfig;
use intercom_transport::WsConnector;

/// Broadcast session control plane.
#[derive(Debug, Parser)]
#[command(name = "intercom", version)]
struct Args {
    /// Settings file; defaults to ~/.intercom/settings.json.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Override the HTTP port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the database path.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings_file = args.settings.unwrap_or_else(intercom_settings::settings_path);
    let mut settings = intercom_settings::load_settings_from_path(&settings_file)
        .with_context(|| format!("loading settings from {}", settings_file.display()))?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(db) = args.db {
        settings.database.path = db;
    }

    let telemetry = intercom_telemetry::init_telemetry(TelemetryConfig::from_levels(
        &settings.logging.level,
        settings
            .logging
            .modules
            .iter()
            .map(|(m, l)| (m.as_str(), l.as_str())),
        settings.logging.json,
    ));

    tracing::info!(settings = %settings_file.display(), "starting intercom control plane");

    let db = Database::open(&settings.database.path).context("opening database")?;
    let connector = WsConnector::new(settings.transport.endpoint_base_url.clone())
        .context("configuring speaker transport")?;
    let fetcher = CatalogFetcher::new(
        db.clone(),
        settings.content.media_dir.clone(),
        settings.content.tts_dir.clone(),
    );

    let manager = SessionManager::new(
        db,
        Arc::new(connector),
        Arc::new(fetcher),
        EngineConfig::from_settings(&settings),
        telemetry.metrics(),
    );

    let handle = intercom_server::start(ServerConfig::from_settings(&settings), manager.clone())
        .await
        .context("starting control server")?;
    tracing::info!(port = handle.port, "intercom control plane ready");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutting down");

    manager.close_all().await;
    handle.shutdown().await;
    Ok(())
}
