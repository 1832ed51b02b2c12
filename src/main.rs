//! Attendance export HTTP server.
//!
//! # Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 3000)
//! - `TEMPLATE_DIR`: Directory holding the workbook templates (default: templates)
//! - `EXPORT_TIMEOUT_SECS`: Per-export deadline in seconds (default: 15)
//! - `EXPORT_BODY_LIMIT_BYTES`: Largest accepted request body (default: 16 MiB)
//! - `RUST_LOG`: Log level (default: info)

use axum::{routing::get, Router};
use std::{env, net::SocketAddr};
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use attendance_export::{ExportConfig, ExportService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_max_level(
            env::var("RUST_LOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Level::INFO),
        )
        .with_target(true)
        .init();

    info!("Starting attendance export service");

    let config = ExportConfig::from_env().map_err(anyhow::Error::msg)?;
    let export_service = ExportService::new(config);

    let app = Router::new()
        .merge(export_service.router())
        .route("/health", get(|| async { "OK" }));

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3000);
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    let listener = TcpListener::bind(addr).await?;
    info!("Server running on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
