//! A local directory tree used as the remote.
//!
//! Remote paths such as `/pdf/Input/a.pdf` resolve below the configured root.
//! Uploads go to a sibling temporary file first and are renamed into place, so
//! a failed copy never leaves a truncated object at the destination.

use super::{RemoteEntry, RemoteStorage};
use crate::error::{TransportError, TransportErrorKind, TransportOp};
use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

const ENOSPC: i32 = 28;
const EDQUOT: i32 = 122;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Maps a remote path to a location below the root, refusing `..`.
    fn resolve(&self, op: TransportOp, remote: &str) -> Result<PathBuf, TransportError> {
        let mut resolved = self.root.clone();
        for component in Path::new(remote.trim()).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(TransportError::new(
                        TransportErrorKind::Other,
                        op,
                        remote,
                        "path escapes the storage root",
                    ));
                }
            }
        }
        Ok(resolved)
    }

    fn remote_path(&self, local: &Path) -> Option<String> {
        let relative = local.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(format!("/{}", parts.join("/")))
    }
}

fn map_io(op: TransportOp, path: &str, err: io::Error) -> TransportError {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => TransportErrorKind::NotFound,
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            TransportErrorKind::Transient
        }
        _ => match err.raw_os_error() {
            Some(ENOSPC) | Some(EDQUOT) => TransportErrorKind::QuotaExceeded,
            _ => TransportErrorKind::Other,
        },
    };
    TransportError::new(kind, op, path, err.to_string())
}

async fn ensure_parent(op: TransportOp, remote: &str, target: &Path) -> Result<(), TransportError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| map_io(op, remote, e))?;
    }
    Ok(())
}

#[async_trait]
impl RemoteStorage for LocalStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let base = self.resolve(TransportOp::List, folder)?;
        if !base.is_dir() {
            return Err(TransportError::not_found(TransportOp::List, folder));
        }

        let root = self.clone();
        let folder_name = folder.to_string();
        tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            for entry in WalkDir::new(&base).min_depth(1) {
                let entry = entry.map_err(|e| {
                    let message = e.to_string();
                    match e.into_io_error() {
                        Some(io_err) => map_io(TransportOp::List, &folder_name, io_err),
                        None => TransportError::new(
                            TransportErrorKind::Other,
                            TransportOp::List,
                            &folder_name,
                            message,
                        ),
                    }
                })?;
                let Some(path) = root.remote_path(entry.path()) else {
                    continue;
                };
                if entry.file_type().is_dir() {
                    entries.push(RemoteEntry::directory(path));
                } else {
                    let metadata = entry
                        .metadata()
                        .map_err(|e| TransportError::new(
                            TransportErrorKind::Other,
                            TransportOp::List,
                            &path,
                            e.to_string(),
                        ))?;
                    entries.push(RemoteEntry::file(path, metadata.len()));
                }
            }
            Ok(entries)
        })
        .await
        .map_err(|e| {
            TransportError::new(TransportErrorKind::Other, TransportOp::List, folder, e.to_string())
        })?
    }

    async fn download(&self, path: &str, local: &Path) -> Result<u64, TransportError> {
        let source = self.resolve(TransportOp::Download, path)?;
        fs::copy(&source, local)
            .await
            .map_err(|e| map_io(TransportOp::Download, path, e))
    }

    async fn upload(&self, local: &Path, dest: &str) -> Result<RemoteEntry, TransportError> {
        let target = self.resolve(TransportOp::Upload, dest)?;
        ensure_parent(TransportOp::Upload, dest, &target).await?;

        let mut staging = target.clone().into_os_string();
        staging.push(".partial");
        let staging = PathBuf::from(staging);

        if let Err(e) = fs::copy(local, &staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(map_io(TransportOp::Upload, dest, e));
        }
        fs::rename(&staging, &target)
            .await
            .map_err(|e| map_io(TransportOp::Upload, dest, e))?;

        let metadata = fs::metadata(&target)
            .await
            .map_err(|e| map_io(TransportOp::Upload, dest, e))?;
        Ok(RemoteEntry::file(dest, metadata.len()))
    }

    async fn delete(&self, path: &str) -> Result<(), TransportError> {
        let target = self.resolve(TransportOp::Delete, path)?;
        fs::remove_file(&target)
            .await
            .map_err(|e| map_io(TransportOp::Delete, path, e))
    }

    async fn move_to(&self, path: &str, dest: &str) -> Result<(), TransportError> {
        let source = self.resolve(TransportOp::Move, path)?;
        let target = self.resolve(TransportOp::Move, dest)?;
        ensure_parent(TransportOp::Move, dest, &target).await?;
        fs::rename(&source, &target)
            .await
            .map_err(|e| map_io(TransportOp::Move, path, e))
    }
}
