//! Transport backed by the `rclone` command line client.
//!
//! The remote must already be configured in rclone; [`RcloneStorage::connect`]
//! only confirms that the binary works and that the remote answers. Transient
//! failures are retried here, so the pipeline sees a single attempt per step.

use super::{RemoteEntry, RemoteStorage};
use crate::constants::{TRANSPORT_COMMAND_TIMEOUT_SECS, TRANSPORT_RETRY_DELAY_SECS};
use crate::error::{SqueezeError, TransportError, TransportErrorKind, TransportOp};
use crate::path_matcher::join_remote;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsJsonItem {
    path: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    mod_time: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RcloneStorage {
    binary: String,
    remote: String,
    retries: u32,
    retry_delay: Duration,
    command_timeout: Duration,
}

impl RcloneStorage {
    /// Checks the rclone binary and the remote, returning a ready transport.
    pub async fn connect(binary: &str, remote: &str, retries: u32) -> crate::error::Result<Self> {
        let storage = Self {
            binary: binary.to_string(),
            remote: remote.trim_end_matches(':').to_string(),
            retries,
            retry_delay: Duration::from_secs(TRANSPORT_RETRY_DELAY_SECS),
            command_timeout: Duration::from_secs(TRANSPORT_COMMAND_TIMEOUT_SECS),
        };

        let version = storage
            .run(TransportOp::Connect, "", &["version"])
            .await
            .map_err(|e| SqueezeError::Session(format!("rclone is not usable: {}", e)))?;
        info!(
            "✅ rclone found: {}",
            version.lines().next().unwrap_or("unknown version")
        );

        let root = storage.target("/");
        storage
            .run(TransportOp::Connect, "/", &["lsd", &root])
            .await
            .map_err(|e| SqueezeError::Session(format!("remote {} is not reachable: {}", storage.remote, e)))?;

        Ok(storage)
    }

    fn target(&self, path: &str) -> String {
        format!("{}:{}", self.remote, path.trim())
    }

    async fn run(&self, op: TransportOp, path: &str, args: &[&str]) -> Result<String, TransportError> {
        let mut attempt = 0;
        loop {
            match self.run_once(op, path, args).await {
                Ok(stdout) => return Ok(stdout),
                Err(err) if err.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "⚠️  rclone {} attempt {} failed: {}. Retrying...",
                        op, attempt, err.message
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_once(&self, op: TransportOp, path: &str, args: &[&str]) -> Result<String, TransportError> {
        debug!("Running: {} {}", self.binary, args.join(" "));

        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::new(TransportErrorKind::Other, op, path, e.to_string()))?;

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                TransportError::new(
                    TransportErrorKind::Transient,
                    op,
                    path,
                    format!("timed out after {}s", self.command_timeout.as_secs()),
                )
            })?
            .map_err(|e| TransportError::new(TransportErrorKind::Other, op, path, e.to_string()))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.trim().is_empty() {
            format!("rclone exited with {}", output.status)
        } else {
            stderr.trim().to_string()
        };
        Err(TransportError::new(classify_stderr(&message), op, path, message))
    }

    async fn stat(&self, op: TransportOp, path: &str) -> Result<RemoteEntry, TransportError> {
        let stdout = self
            .run(op, path, &["lsjson", "--stat", &self.target(path)])
            .await?;
        let item: LsJsonItem = serde_json::from_str(&stdout).map_err(|e| {
            TransportError::new(TransportErrorKind::Other, op, path, format!("bad lsjson output: {}", e))
        })?;
        Ok(RemoteEntry {
            path: path.to_string(),
            size_bytes: item.size.max(0) as u64,
            is_directory: item.is_dir,
            modified: item.mod_time,
        })
    }
}

/// Maps rclone's error text to a transport error kind.
pub fn classify_stderr(stderr: &str) -> TransportErrorKind {
    let text = stderr.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if any(&["not found", "doesn't exist", "does not exist", "enoent"]) {
        TransportErrorKind::NotFound
    } else if any(&["quota", "insufficient storage", "storage full", "eoverquota", "no space left"]) {
        TransportErrorKind::QuotaExceeded
    } else if any(&["login", "unauthorized", "401", "expired", "invalid session", "esid", "authentication"]) {
        TransportErrorKind::AuthExpired
    } else if any(&[
        "timeout",
        "timed out",
        "connection reset",
        "connection refused",
        "temporarily",
        "unexpected eof",
        "429",
        "503",
        "eagain",
    ]) {
        TransportErrorKind::Transient
    } else {
        TransportErrorKind::Other
    }
}

/// Parses `rclone lsjson -R` output for `folder` into entries with full paths.
pub fn parse_listing(folder: &str, stdout: &str) -> Result<Vec<RemoteEntry>, TransportError> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let items: Vec<LsJsonItem> = serde_json::from_str(stdout).map_err(|e| {
        TransportError::new(
            TransportErrorKind::Other,
            TransportOp::List,
            folder,
            format!("bad lsjson output: {}", e),
        )
    })?;

    Ok(items
        .into_iter()
        .map(|item| RemoteEntry {
            path: join_remote(folder, &item.path),
            size_bytes: item.size.max(0) as u64,
            is_directory: item.is_dir,
            modified: item.mod_time,
        })
        .collect())
}

#[async_trait]
impl RemoteStorage for RcloneStorage {
    fn name(&self) -> &str {
        "rclone"
    }

    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let stdout = self
            .run(TransportOp::List, folder, &["lsjson", "-R", &self.target(folder)])
            .await?;
        parse_listing(folder, &stdout)
    }

    async fn download(&self, path: &str, local: &Path) -> Result<u64, TransportError> {
        let local_arg = local.to_string_lossy();
        self.run(TransportOp::Download, path, &["copyto", &self.target(path), &local_arg])
            .await?;
        tokio::fs::metadata(local)
            .await
            .map(|m| m.len())
            .map_err(|e| {
                TransportError::new(
                    TransportErrorKind::Other,
                    TransportOp::Download,
                    path,
                    format!("file missing after download: {}", e),
                )
            })
    }

    async fn upload(&self, local: &Path, dest: &str) -> Result<RemoteEntry, TransportError> {
        let local_arg = local.to_string_lossy();
        self.run(TransportOp::Upload, dest, &["copyto", &local_arg, &self.target(dest)])
            .await?;
        self.stat(TransportOp::Upload, dest).await
    }

    async fn delete(&self, path: &str) -> Result<(), TransportError> {
        self.run(TransportOp::Delete, path, &["deletefile", &self.target(path)])
            .await
            .map(|_| ())
    }

    async fn move_to(&self, path: &str, dest: &str) -> Result<(), TransportError> {
        self.run(TransportOp::Move, path, &["moveto", &self.target(path), &self.target(dest)])
            .await
            .map(|_| ())
    }
}
