//! PerfectFit Sync Server
//!
//! Authoritative store for customers, orders and measurements uploaded by
//! PerfectFit devices. Devices exchange changes with `POST /api/sync/batch`.
//!
//! # Configuration
//!
//! Environment variables:
//! - `PERFECTFIT_PORT`: Port to listen on (default: 3000)
//! - `PERFECTFIT_DATA_DIR`: Directory holding the database (default: ~/.local/share/perfectfit-server)
//!
//! # Endpoints
//!
//! - `GET /api/health`: Health check
//! - `POST /api/sync/batch`: Upload changes of every kind and download the delta
//! - `GET|POST /api/{customers,orders,measurements}`: List or save one record
//! - `GET /api/{kind}/modified?since=<millis>`: Records changed after `since`
//! - `POST /api/{kind}/batch`: Single-kind variant of the batch sync

use std::net::SocketAddr;
use std::path::PathBuf;

use perfectfit::server::{router, AppState, ServerStorage};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DATABASE_FILE: &str = "perfectfit.db";

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Directory holding the SQLite database
    data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("PERFECTFIT_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let data_dir = std::env::var("PERFECTFIT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("perfectfit-server")
            });

        Self { port, data_dir }
    }

    fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perfectfit_server=info,perfectfit=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    let database_path = config.database_path();
    tracing::info!("Database: {}", database_path.display());

    let (storage, reports) = ServerStorage::open(&database_path).await?;
    for report in reports.iter().filter(|r| r.removed > 0) {
        tracing::warn!(
            "Removed {} duplicate {} record(s) in {} group(s)",
            report.removed,
            report.kind,
            report.duplicate_groups
        );
    }

    let app = router(AppState { storage })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
