//! GCS Receiver: ground-station endpoint for forwarded mapping artifacts
//!
//! ```bash
//! gcs-receiver --listen-addr 0.0.0.0:65433 --receive-dir received_orthophotos
//! ```
//!
//! ## Environment variables
//!
//! | Variable            | Required | Description                          |
//! |---------------------|----------|--------------------------------------|
//! | `AEROSURVEY_CONFIG` | No       | TOML config; `[gcs]` section is used |
//! | `RUST_LOG`          | No       | Logging level (default: info)        |

use aerosurvey::config::SurveyConfig;
use aerosurvey::ingest::{bind_listener, GcsReceiver};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gcs-receiver", about = "Receives orthophotos forwarded by the ingestion server")]
struct CliArgs {
    /// Bind address (default from [gcs] listen_addr)
    #[arg(long, env = "AEROSURVEY_GCS_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Directory received files are stored in
    #[arg(long, env = "AEROSURVEY_GCS_RECEIVE_DIR")]
    receive_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = SurveyConfig::load();
    let listen_addr = args.listen_addr.unwrap_or(config.gcs.listen_addr);
    let receive_dir = args.receive_dir.unwrap_or(config.gcs.receive_dir);

    std::fs::create_dir_all(&receive_dir)
        .with_context(|| format!("Failed to create {}", receive_dir.display()))?;
    let listener = bind_listener(&listen_addr).with_context(|| format!("Failed to bind {listen_addr}"))?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, shutting down");
        shutdown.cancel();
    });

    let receiver = Arc::new(GcsReceiver::new(receive_dir, config.server.connection_timeout()));
    receiver.run(listener, cancel).await;
    Ok(())
}
