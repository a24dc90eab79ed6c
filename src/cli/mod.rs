use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::app::{router, AppState};
use crate::config::config;
use crate::database::DatabaseManager;
use crate::uploads::DiskFileIntake;

#[derive(Parser)]
#[command(name = "fieldops-api")]
#[command(about = "FieldOps API - tickets, site surveys and technician teams")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP server (default)")]
    Serve {
        #[arg(long, help = "Port to listen on (overrides FIELDOPS_API_PORT)")]
        port: Option<u16>,

        #[arg(long, help = "Directory uploaded files are written to (overrides UPLOAD_DIR)")]
        upload_dir: Option<PathBuf>,
    },

    #[command(about = "Check that the configured database is reachable")]
    CheckDb,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Commands::Serve { port: None, upload_dir: None }) {
        Commands::Serve { port, upload_dir } => serve(port, upload_dir).await,
        Commands::CheckDb => check_db().await,
    }
}

async fn serve(port: Option<u16>, upload_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = config();
    info!("Starting FieldOps API in {:?} mode", settings.environment);

    let pool = DatabaseManager::pool()?;

    let upload_dir = upload_dir.unwrap_or_else(|| PathBuf::from(&settings.storage.upload_dir));
    let intake = DiskFileIntake::new(&upload_dir, &settings.storage.public_prefix);
    intake.ensure_root().await?;

    let app = router(AppState::new(pool, Arc::new(intake), &upload_dir));

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(settings.api.port)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("FieldOps API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    DatabaseManager::close().await;
    Ok(())
}

async fn check_db() -> anyhow::Result<()> {
    let pool = DatabaseManager::pool()?;
    DatabaseManager::health_check(&pool).await?;
    println!("database: ok");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
