//! AeroSurvey - aerial survey coordination
//!
//! One binary, one subcommand per process:
//!
//! ```bash
//! # Trigger controller against SITL with the simulated camera
//! aerosurvey trigger --endpoint tcp:127.0.0.1:5762 --simulate
//!
//! # Trigger controller with a wired GoPro
//! aerosurvey trigger --endpoint /dev/ttyACM0:57600 --backend gopro --identifier C3501325004565
//!
//! # Upload client relaying the capture directory
//! aerosurvey upload --server-addr 10.0.0.2:65432
//!
//! # Ingestion server with the mapping gate and browse API
//! aerosurvey serve --script ./run_mapping.sh
//! ```
//!
//! # Environment Variables
//!
//! - `AEROSURVEY_CONFIG`: Path to the TOML config (default: `./aerosurvey.toml`)
//! - `RUST_LOG`: Logging level (default: info)

use aerosurvey::acquisition::{run_telemetry, MavlinkConnector, TelemetryEndpoint, TelemetrySource};
use aerosurvey::api::{self, AppState};
use aerosurvey::config::{defaults, SurveyConfig};
use aerosurvey::device::{build_device, DeviceBackend};
use aerosurvey::ingest::{
    bind_listener, ExternalScript, Forwarder, IngestionGate, StatusBoard, UploadReceiver,
};
use aerosurvey::retry::RetryPolicy;
use aerosurvey::storage::ProcessLock;
use aerosurvey::trigger::{run_event_loop, CaptureLoop, CaptureSettings, MissionPatterns, TriggerController};
use aerosurvey::uplink::status::run_status_reporter;
use aerosurvey::uplink::{CaptureWatcher, StatusReport, UploadQueue, Uploader};
use anyhow::{Context, Result};
use axum::Router;
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long the supervisor waits for tasks to wind down after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "aerosurvey")]
#[command(about = "Aerial survey coordination: camera triggering, image relay and mapping gate")]
#[command(version)]
struct CliArgs {
    /// Config file (overrides AEROSURVEY_CONFIG and ./aerosurvey.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Follow flight controller telemetry and trigger the camera
    Trigger {
        /// Telemetry endpoint: tcp:HOST:PORT, udp:HOST:PORT or DEVICE:BAUD
        #[arg(long, env = "AEROSURVEY_ENDPOINT")]
        endpoint: Option<String>,

        /// Camera identifier (serial number for the GoPro backend)
        #[arg(long, env = "AEROSURVEY_CAMERA_ID")]
        identifier: Option<String>,

        /// Camera backend
        #[arg(long, value_enum)]
        backend: Option<DeviceBackend>,

        /// Use the simulated camera (same as --backend simulated)
        #[arg(long, conflicts_with = "backend")]
        simulate: bool,

        /// Directory captures and markers are written to
        #[arg(long, env = "AEROSURVEY_OUTPUT_DIR")]
        output_dir: Option<PathBuf>,
    },

    /// Relay the capture directory to the ingestion server
    Upload {
        /// Ingestion server HOST:PORT
        #[arg(long, env = "AEROSURVEY_SERVER_ADDR")]
        server_addr: Option<String>,

        /// Capture directory to watch
        #[arg(long, env = "AEROSURVEY_WATCH_DIR")]
        watch_dir: Option<PathBuf>,
    },

    /// Receive uploads and run the mapping pipeline per mission
    Serve {
        /// Upload listener HOST:PORT
        #[arg(long, env = "AEROSURVEY_LISTEN_ADDR")]
        listen_addr: Option<String>,

        /// Directory uploads are stored in
        #[arg(long, env = "AEROSURVEY_UPLOAD_DIR")]
        upload_dir: Option<PathBuf>,

        /// Mapping process entry point
        #[arg(long, env = "AEROSURVEY_MAPPING_SCRIPT")]
        script: Option<PathBuf>,

        /// Browse API HOST:PORT (empty disables the API)
        #[arg(long)]
        api_addr: Option<String>,
    },
}

impl SubCommand {
    /// Fold command-line overrides into the loaded config.
    fn apply(&self, config: &mut SurveyConfig) {
        match self {
            Self::Trigger {
                endpoint,
                identifier,
                backend,
                simulate,
                output_dir,
            } => {
                if let Some(e) = endpoint {
                    config.telemetry.endpoint = e.clone();
                }
                if let Some(id) = identifier {
                    config.camera.identifier = id.clone();
                }
                if *simulate {
                    config.camera.backend = DeviceBackend::Simulated;
                } else if let Some(b) = backend {
                    config.camera.backend = *b;
                }
                if let Some(dir) = output_dir {
                    config.camera.output_dir = dir.clone();
                }
            }
            Self::Upload { server_addr, watch_dir } => {
                if let Some(addr) = server_addr {
                    config.uplink.server_addr = addr.clone();
                }
                if let Some(dir) = watch_dir {
                    config.uplink.watch_dir = dir.clone();
                }
            }
            Self::Serve {
                listen_addr,
                upload_dir,
                script,
                api_addr,
            } => {
                if let Some(addr) = listen_addr {
                    config.server.listen_addr = addr.clone();
                }
                if let Some(dir) = upload_dir {
                    config.server.upload_dir = dir.clone();
                }
                if let Some(s) = script {
                    config.pipeline.script = s.clone();
                }
                if let Some(addr) = api_addr {
                    config.server.api_addr = addr.clone();
                }
            }
        }
    }
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    Telemetry,
    TriggerLoop,
    CaptureLoop,
    StatusReporter,
    Receiver,
    Gate,
    HttpServer,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Telemetry => write!(f, "Telemetry"),
            TaskName::TriggerLoop => write!(f, "TriggerLoop"),
            TaskName::CaptureLoop => write!(f, "CaptureLoop"),
            TaskName::StatusReporter => write!(f, "StatusReporter"),
            TaskName::Receiver => write!(f, "Receiver"),
            TaskName::Gate => write!(f, "Gate"),
            TaskName::HttpServer => write!(f, "HttpServer"),
        }
    }
}

/// Run the supervisor loop: monitor tasks, cancel on failure, then give the
/// rest a grace period to finish.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("[Supervisor] All tasks spawned, monitoring");
    let mut outcome = Ok(());

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("[Supervisor] Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("[Supervisor] Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("[Supervisor] Task failed with error: {}", e);
                        cancel_token.cancel();
                        outcome = Err(e);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("[Supervisor] Task panicked: {}", e);
                        cancel_token.cancel();
                        outcome = Err(anyhow::anyhow!("Task panicked: {}", e));
                        break;
                    }
                    None => {
                        info!("[Supervisor] All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    let drain = async { while task_set.join_next().await.is_some() {} };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("[Supervisor] Tasks still running after grace period, aborting");
        task_set.shutdown().await;
    }
    outcome
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

// ============================================================================
// Trigger Process
// ============================================================================

async fn run_trigger(config: SurveyConfig, cancel_token: CancellationToken) -> Result<()> {
    let patterns = MissionPatterns::from_config(&config.mission).context("Invalid mission.waypoint_regex")?;
    std::fs::create_dir_all(&config.camera.output_dir)
        .with_context(|| format!("Failed to create {}", config.camera.output_dir.display()))?;

    let endpoint: TelemetryEndpoint = config
        .telemetry
        .endpoint
        .parse()
        .context("Invalid telemetry endpoint")?;
    let device = build_device(&config.camera).context("Failed to set up camera backend")?;

    info!("  Telemetry: {}", endpoint);
    info!("  Camera:    {} ({})", config.camera.backend, device.name());
    info!("  Output:    {}", config.camera.output_dir.display());

    let controller = Arc::new(TriggerController::new(patterns, &config.camera.output_dir));
    let connected = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel(defaults::TELEMETRY_CHANNEL_CAPACITY);

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task 1: telemetry link with reconnect
    let source = TelemetrySource::new(Arc::new(MavlinkConnector), endpoint, config.telemetry.heartbeat_timeout());
    let reconnect = RetryPolicy::unbounded(config.telemetry.reconnect_delay());
    let link_state = Arc::clone(&connected);
    let cancel = cancel_token.clone();
    task_set.spawn(async move {
        run_telemetry(source, tx, link_state, reconnect, cancel).await;
        Ok(TaskName::Telemetry)
    });

    // Task 2: status texts into the state machine
    let event_controller = Arc::clone(&controller);
    let cancel = cancel_token.clone();
    task_set.spawn(async move {
        run_event_loop(event_controller, rx, cancel).await;
        Ok(TaskName::TriggerLoop)
    });

    // Task 3: capture loop owning the device session
    let capture = CaptureLoop::new(Arc::clone(&controller), device, CaptureSettings::from_config(&config.camera));
    let cancel = cancel_token.clone();
    task_set.spawn(async move {
        capture.run(cancel).await;
        Ok(TaskName::CaptureLoop)
    });

    // Task 4: optional status reports to the server
    if config.status.enabled {
        let status_controller = Arc::clone(&controller);
        let link_state = Arc::clone(&connected);
        let source_name = format!("trigger-{}", config.camera.identifier);
        let snapshot = move || StatusReport {
            source: source_name.clone(),
            telemetry_connected: link_state.load(Ordering::Relaxed),
            camera_ready: status_controller.is_device_ready(),
            capturing: status_controller.is_capturing(),
            captured: status_controller.capture_stats().captured,
            timestamp: Utc::now(),
        };
        let status_config = config.status.clone();
        let timeout = config.uplink.socket_timeout();
        let cancel = cancel_token.clone();
        task_set.spawn(async move {
            run_status_reporter(status_config, timeout, snapshot, cancel).await;
            Ok(TaskName::StatusReporter)
        });
    }

    let result = run_supervisor(&mut task_set, cancel_token).await;

    let stats = controller.capture_stats();
    info!(
        captured = stats.captured,
        missed = stats.missed,
        session_failures = stats.session_failures,
        missions = stats.missions_completed,
        "Capture statistics"
    );
    result
}

// ============================================================================
// Upload Process
// ============================================================================

/// First Ctrl+C stops watching and drains the queue; a second one abandons
/// the drain.
async fn run_upload(config: SurveyConfig) -> Result<()> {
    let _lock = ProcessLock::acquire(&config.uplink.watch_dir, "upload")?;

    let shutdown = CancellationToken::new();
    let abort = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        let abort = abort.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received Ctrl+C, draining upload queue (Ctrl+C again to abandon)");
            shutdown.cancel();
            tokio::signal::ctrl_c().await.ok();
            warn!("Second Ctrl+C, abandoning drain");
            abort.cancel();
        });
    }

    info!("  Watching: {}", config.uplink.watch_dir.display());
    info!("  Server:   {}", config.uplink.server_addr);

    let (queue, consumer) = UploadQueue::new();
    let watcher = CaptureWatcher::new(&config.uplink, &config.mission.marker_extension);
    let watcher_task = tokio::spawn(watcher.run(queue.clone(), shutdown.clone()));

    let uploader = Uploader::from_config(&config.uplink);
    let consumer_abort = abort.clone();
    let consumer_task = tokio::spawn(async move { uploader.run(consumer, consumer_abort).await });

    shutdown.cancelled().await;
    if let Err(e) = watcher_task.await {
        warn!(error = %e, "Watcher task ended abnormally");
    }

    let pending = queue.pending();
    if pending > 0 {
        info!(pending = pending, "Waiting for queued uploads");
    }
    tokio::select! {
        _ = queue.join() => info!("Upload queue drained"),
        _ = abort.cancelled() => warn!(pending = queue.pending(), "Drain abandoned, files stay on disk"),
    }
    // The consumer may already have stopped on abort.
    let _ = queue.stop();

    let stats = consumer_task.await.context("Uploader task failed")?;
    info!(
        images = stats.images_sent,
        markers = stats.markers_sent,
        bytes = stats.bytes_sent,
        failed_attempts = stats.failed_attempts,
        abandoned = stats.abandoned,
        deleted = stats.files_deleted,
        "Upload statistics"
    );
    Ok(())
}

// ============================================================================
// Ingestion Server
// ============================================================================

async fn run_serve(config: SurveyConfig, cancel_token: CancellationToken) -> Result<()> {
    let upload_dir = config.server.upload_dir.clone();
    std::fs::create_dir_all(&upload_dir)
        .with_context(|| format!("Failed to create {}", upload_dir.display()))?;
    // Dataset cleanup removes the upload directory, so the lock lives one
    // level above the dataset.
    let lock_dir = config
        .pipeline
        .dataset_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let _lock = ProcessLock::acquire(lock_dir, "serve")?;

    let statuses = Arc::new(StatusBoard::default());
    let receiver = Arc::new(UploadReceiver::new(
        &upload_dir,
        config.server.connection_timeout(),
        Arc::clone(&statuses),
    ));
    let listener = bind_listener(&config.server.listen_addr)
        .with_context(|| format!("Failed to bind upload listener {}", config.server.listen_addr))?;

    let pipeline = Arc::new(ExternalScript::new(&config.pipeline.script));
    let mut gate = IngestionGate::new(
        &upload_dir,
        &config.mission.marker_extension,
        pipeline,
        &config.pipeline.dataset_dir,
    )
    .with_cleanup(config.pipeline.cleanup_dataset);
    if config.forward.enabled {
        gate = gate.with_forwarding(Forwarder::from_config(&config.forward), config.pipeline.artifacts.clone());
    }
    let gate = Arc::new(gate);

    info!("  Uploads:  {} -> {}", config.server.listen_addr, upload_dir.display());
    info!("  Mapping:  {} {}", config.pipeline.script.display(), config.pipeline.dataset_dir.display());
    if config.forward.enabled {
        info!("  Forward:  {}", config.forward.addr);
    }

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    let rx = Arc::clone(&receiver);
    let cancel = cancel_token.clone();
    task_set.spawn(async move {
        rx.run(listener, cancel).await;
        Ok(TaskName::Receiver)
    });

    let gate_task = Arc::clone(&gate);
    let interval = config.server.marker_poll_interval();
    let cancel = cancel_token.clone();
    task_set.spawn(async move {
        gate_task.run(interval, cancel).await;
        Ok(TaskName::Gate)
    });

    if !config.server.api_addr.is_empty() {
        let api_listener = tokio::net::TcpListener::bind(config.server.api_addr.as_str())
            .await
            .with_context(|| format!("Failed to bind API listener {}", config.server.api_addr))?;
        info!("  API:      http://{}/api/v1", config.server.api_addr);
        let app = api::create_app(AppState {
            upload_dir: upload_dir.clone(),
            gate: Arc::clone(&gate),
            statuses,
        });
        spawn_http_server(&mut task_set, api_listener, app, cancel_token.clone());
    }

    let result = run_supervisor(&mut task_set, cancel_token).await;

    let stats = receiver.stats();
    info!(
        files = stats.files_received,
        bytes = stats.bytes_received,
        status_reports = stats.status_reports,
        rejected = stats.rejected,
        batches = gate.snapshot().batches_completed,
        "Server statistics"
    );
    result
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => SurveyConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SurveyConfig::load(),
    };
    args.command.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!("AeroSurvey {}", env!("CARGO_PKG_VERSION"));

    match args.command {
        SubCommand::Upload { .. } => run_upload(config).await?,
        command => {
            // Graceful shutdown via Ctrl+C
            let cancel_token = CancellationToken::new();
            let shutdown_token = cancel_token.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Received Ctrl+C, initiating shutdown");
                shutdown_token.cancel();
            });

            match command {
                SubCommand::Trigger { .. } => run_trigger(config, cancel_token).await?,
                _ => run_serve(config, cancel_token).await?,
            }
        }
    }

    info!("AeroSurvey shutdown complete");
    Ok(())
}
