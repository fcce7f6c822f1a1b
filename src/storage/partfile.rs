//! Partial-file guard for inbound transfers
//!
//! Inbound files are written under a `.part` name and renamed once
//! complete, so directory scanners never see a half-written file. If the
//! transfer fails, or the task is dropped on timeout, the guard removes the
//! partial file.

use std::path::{Path, PathBuf};
use tokio::fs::File;

pub const PART_SUFFIX: &str = "part";

pub struct PartFile {
    part_path: PathBuf,
    final_path: PathBuf,
    armed: bool,
}

impl PartFile {
    /// Create `<final>.part` exclusively.
    ///
    /// `stem` gets `_N` appended while either the
    /// final or the part name is already taken.
    pub async fn create(dir: &Path, stem: &str, extension: &str) -> std::io::Result<(Self, File)> {
        let mut n = 0u32;
        loop {
            let name = if n == 0 {
                format!("{stem}.{extension}")
            } else {
                format!("{stem}_{n}.{extension}")
            };
            let final_path = dir.join(&name);
            let part_path = dir.join(format!("{name}.{PART_SUFFIX}"));
            n += 1;
            if final_path.exists() {
                continue;
            }
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&part_path)
                .await
            {
                Ok(file) => {
                    return Ok((
                        Self {
                            part_path,
                            final_path,
                            armed: true,
                        },
                        file,
                    ))
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Create `<final_path>.part` exclusively for a name the caller already
    /// picked.
    pub async fn for_path(final_path: impl Into<PathBuf>) -> std::io::Result<(Self, File)> {
        let final_path = final_path.into();
        let mut name = final_path.clone().into_os_string();
        name.push(format!(".{PART_SUFFIX}"));
        let part_path = PathBuf::from(name);
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&part_path)
            .await?;
        Ok((
            Self {
                part_path,
                final_path,
                armed: true,
            },
            file,
        ))
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Rename to the final name and disarm the guard.
    pub async fn commit(mut self) -> std::io::Result<PathBuf> {
        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        self.armed = false;
        Ok(self.final_path.clone())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.part_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.part_path.display(), error = %e, "Failed to remove partial file");
                }
            } else {
                tracing::debug!(path = %self.part_path.display(), "Removed partial file");
            }
        }
    }
}
