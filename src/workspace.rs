//! Local scratch space for in-flight files.
//!
//! One [`ScratchArea`] per run, one [`FileScratch`] per file. Both are
//! `TempDir`s, so every exit path removes what they hold.

use crate::constants::SCRATCH_COPIES_PER_FILE;
use crate::error::Result;
use crate::utils::format_file_size;
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tempfile::{Builder, TempDir};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct ScratchArea {
    root: TempDir,
}

impl ScratchArea {
    /// Creates the run directory under `work_dir`, or the system temp dir.
    pub fn new(work_dir: Option<&Path>) -> Result<Self> {
        let mut builder = Builder::new();
        builder.prefix("pdf-squeeze-");
        let root = match work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };
        debug!("Scratch area at {}", root.path().display());
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// A fresh directory for one file, removed when dropped.
    pub fn file_scratch(&self) -> std::io::Result<FileScratch> {
        let dir = Builder::new().prefix("file-").tempdir_in(self.root.path())?;
        Ok(FileScratch { dir })
    }

    /// Warns when the scratch volume cannot hold `workers` files of
    /// `largest_file` bytes at once. Returns the free space when known.
    pub fn preflight(&self, largest_file: u64, workers: usize) -> Option<u64> {
        let needed = largest_file
            .saturating_mul(SCRATCH_COPIES_PER_FILE)
            .saturating_mul(workers.max(1) as u64);
        let available = available_space(self.path())?;
        if available < needed {
            warn!(
                "⚠️  Scratch volume has {} free, in-flight files may need {}",
                format_file_size(available),
                format_file_size(needed)
            );
        }
        Some(available)
    }
}

/// Free bytes on the disk holding `path`, using the deepest matching mount.
pub fn available_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().components().count())
        .map(|disk| disk.available_space())
}

#[derive(Debug)]
pub struct FileScratch {
    dir: TempDir,
}

impl FileScratch {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the downloaded original lives.
    pub fn original(&self, file_name: &str) -> PathBuf {
        self.dir.path().join(format!("original-{}", sanitize(file_name)))
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}
