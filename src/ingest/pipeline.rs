//! External mapping pipeline
//!
//! The mapping tool is an opaque batch process: `script <dataset_dir>`,
//! exit code 0 means success. Its output is re-emitted through the log.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to start mapping process {}: {source}", .script.display())]
    Spawn {
        script: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed waiting for mapping process: {0}")]
    Wait(#[from] std::io::Error),
}

/// Result of one mapping run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineOutcome {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub success: bool,
    pub duration: Duration,
}

#[async_trait]
pub trait MappingPipeline: Send + Sync {
    /// Run the pipeline over `dataset_dir` to completion.
    async fn run(&self, dataset_dir: &Path) -> Result<PipelineOutcome, PipelineError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Runs an executable with the dataset directory as its only argument.
pub struct ExternalScript {
    script: PathBuf,
}

impl ExternalScript {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

/// Log every line of `reader` until EOF. Output that is not UTF-8 is logged
/// lossily; the pipe is always drained.
async fn pipe_lines<R: AsyncRead + Unpin>(reader: R, stderr: bool) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "[Pipeline] Lost mapping process output");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if stderr {
            warn!(target: "mapping", "{}", line);
        } else {
            info!(target: "mapping", "{}", line);
        }
    }
}

#[async_trait]
impl MappingPipeline for ExternalScript {
    async fn run(&self, dataset_dir: &Path) -> Result<PipelineOutcome, PipelineError> {
        info!(
            script = %self.script.display(),
            dataset = %dataset_dir.display(),
            "[Pipeline] Starting mapping process"
        );
        let started = Instant::now();

        let mut child = Command::new(&self.script)
            .arg(dataset_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PipelineError::Spawn {
                script: self.script.clone(),
                source,
            })?;

        let stdout = child.stdout.take().map(|out| tokio::spawn(pipe_lines(out, false)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(pipe_lines(err, true)));

        let status = child.wait().await?;
        for reader in [stdout, stderr].into_iter().flatten() {
            let _ = reader.await;
        }

        let outcome = PipelineOutcome {
            exit_code: status.code(),
            success: status.success(),
            duration: started.elapsed(),
        };
        if outcome.success {
            info!(duration = ?outcome.duration, "[Pipeline] Mapping process finished");
        } else {
            warn!(exit_code = ?outcome.exit_code, duration = ?outcome.duration, "[Pipeline] Mapping process failed");
        }
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "external-script"
    }
}
