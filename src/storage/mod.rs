//! Remote folder transports.
//!
//! The pipeline only talks to [`RemoteStorage`]. Every operation reports a
//! [`TransportError`] whose kind tells apart missing objects, exhausted quota,
//! transient network trouble and expired sessions.

pub mod local;
pub mod memory;
pub mod rclone;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use rclone::RcloneStorage;

use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One object in a remote listing. Identity is the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub path: String,
    pub size_bytes: u64,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

impl RemoteEntry {
    pub fn file(path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            is_directory: false,
            modified: None,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size_bytes: 0,
            is_directory: true,
            modified: None,
        }
    }
}

/// Operations the pipeline needs from a remote folder tree.
///
/// Implementors perform each call once from the pipeline's point of view;
/// any retrying of transient failures happens inside the transport.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Short transport name for logs.
    fn name(&self) -> &str;

    /// Lists `folder` recursively, directories included.
    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, TransportError>;

    /// Copies the remote object at `path` to `local`, returning its size.
    async fn download(&self, path: &str, local: &Path) -> Result<u64, TransportError>;

    /// Stores `local` at `dest`, creating parent folders, and returns the
    /// entry as the remote now reports it.
    async fn upload(&self, local: &Path, dest: &str) -> Result<RemoteEntry, TransportError>;

    async fn delete(&self, path: &str) -> Result<(), TransportError>;

    async fn move_to(&self, path: &str, dest: &str) -> Result<(), TransportError>;
}
