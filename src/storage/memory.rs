//! In-memory remote tree.
//!
//! Keeps object bytes in a map, records every call in an operation log and can
//! be told to fail chosen operations. The replacer and pipeline tests drive it.

use super::{RemoteEntry, RemoteStorage};
use crate::error::{TransportError, TransportErrorKind, TransportOp};
use crate::path_matcher::{belongs_to, normalize_path};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub op: TransportOp,
    pub path: String,
    pub dest: Option<String>,
}

#[derive(Debug, Clone)]
struct Fault {
    op: TransportOp,
    path_contains: Option<String>,
    kind: TransportErrorKind,
    truncate_to: Option<usize>,
    drops_source: bool,
    once: bool,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Vec<u8>>,
    extra_listing: Vec<RemoteEntry>,
    faults: Vec<Fault>,
    log: Vec<Operation>,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, bytes: Vec<u8>) {
        self.lock().objects.insert(path.to_string(), bytes);
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().objects.contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Adds an entry that `list` reports without backing bytes, such as a
    /// duplicate row returned by a flaky listing.
    pub fn add_listing_entry(&self, entry: RemoteEntry) {
        self.lock().extra_listing.push(entry);
    }

    /// Makes every `op` call fail with `kind`, optionally only for paths
    /// containing `path_contains`.
    pub fn fail(&self, op: TransportOp, path_contains: Option<&str>, kind: TransportErrorKind) {
        self.lock().faults.push(Fault {
            op,
            path_contains: path_contains.map(str::to_string),
            kind,
            truncate_to: None,
            drops_source: false,
            once: false,
        });
    }

    /// Like [`MemoryStorage::fail`], but only the first matching call fails.
    pub fn fail_once(&self, op: TransportOp, path_contains: Option<&str>, kind: TransportErrorKind) {
        self.lock().faults.push(Fault {
            op,
            path_contains: path_contains.map(str::to_string),
            kind,
            truncate_to: None,
            drops_source: false,
            once: true,
        });
    }

    /// Makes the next matching upload store only the first `len` bytes and
    /// then fail, leaving a partial object behind.
    pub fn fail_upload_partially(&self, path_contains: &str, len: usize) {
        self.lock().faults.push(Fault {
            op: TransportOp::Upload,
            path_contains: Some(path_contains.to_string()),
            kind: TransportErrorKind::Transient,
            truncate_to: Some(len),
            drops_source: false,
            once: true,
        });
    }

    /// Makes the next matching move lose its source and then fail without
    /// writing the destination, like a server-side move cut off halfway.
    pub fn fail_move_midway(&self, path_contains: &str) {
        self.lock().faults.push(Fault {
            op: TransportOp::Move,
            path_contains: Some(path_contains.to_string()),
            kind: TransportErrorKind::Transient,
            truncate_to: None,
            drops_source: true,
            once: true,
        });
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.lock().log.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl State {
    fn record(&mut self, op: TransportOp, path: &str, dest: Option<&str>) {
        self.log.push(Operation {
            op,
            path: path.to_string(),
            dest: dest.map(str::to_string),
        });
    }

    /// Finds the first fault matching the call, consuming one-shot faults.
    fn take_fault(&mut self, op: TransportOp, path: &str) -> Option<Fault> {
        let index = self.faults.iter().position(|f| {
            f.op == op
                && f.path_contains
                    .as_deref()
                    .map_or(true, |needle| path.contains(needle))
        })?;
        if self.faults[index].once {
            Some(self.faults.remove(index))
        } else {
            Some(self.faults[index].clone())
        }
    }

    fn injected(&mut self, op: TransportOp, path: &str) -> Result<(), TransportError> {
        match self.take_fault(op, path) {
            Some(fault) if fault.truncate_to.is_none() && !fault.drops_source => Err(TransportError::new(
                fault.kind,
                op,
                path,
                "injected failure",
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStorage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let mut state = self.lock();
        state.record(TransportOp::List, folder, None);
        state.injected(TransportOp::List, folder)?;

        let mut directories = BTreeSet::new();
        let mut entries = Vec::new();
        for (path, bytes) in &state.objects {
            if !belongs_to(path, folder) || normalize_path(path) == normalize_path(folder) {
                continue;
            }
            let mut parent = path.as_str();
            while let Some((head, _)) = parent.rsplit_once('/') {
                if !belongs_to(head, folder) || normalize_path(head) == normalize_path(folder) {
                    break;
                }
                directories.insert(head.to_string());
                parent = head;
            }
            entries.push(RemoteEntry::file(path.clone(), bytes.len() as u64));
        }
        entries.extend(directories.into_iter().map(RemoteEntry::directory));
        entries.extend(
            state
                .extra_listing
                .iter()
                .filter(|e| belongs_to(&e.path, folder))
                .cloned(),
        );
        Ok(entries)
    }

    async fn download(&self, path: &str, local: &Path) -> Result<u64, TransportError> {
        let bytes = {
            let mut state = self.lock();
            state.record(TransportOp::Download, path, None);
            state.injected(TransportOp::Download, path)?;
            state
                .objects
                .get(path)
                .cloned()
                .ok_or_else(|| TransportError::not_found(TransportOp::Download, path))?
        };
        tokio::fs::write(local, &bytes).await.map_err(|e| {
            TransportError::new(
                TransportErrorKind::Other,
                TransportOp::Download,
                path,
                e.to_string(),
            )
        })?;
        Ok(bytes.len() as u64)
    }

    async fn upload(&self, local: &Path, dest: &str) -> Result<RemoteEntry, TransportError> {
        let bytes = tokio::fs::read(local).await.map_err(|e| {
            TransportError::new(TransportErrorKind::Other, TransportOp::Upload, dest, e.to_string())
        })?;

        let mut state = self.lock();
        state.record(TransportOp::Upload, dest, None);
        if let Some(fault) = state.take_fault(TransportOp::Upload, dest) {
            if let Some(len) = fault.truncate_to {
                let partial = bytes[..len.min(bytes.len())].to_vec();
                state.objects.insert(dest.to_string(), partial);
            }
            return Err(TransportError::new(
                fault.kind,
                TransportOp::Upload,
                dest,
                "injected failure",
            ));
        }

        let size = bytes.len() as u64;
        state.objects.insert(dest.to_string(), bytes);
        Ok(RemoteEntry::file(dest, size))
    }

    async fn delete(&self, path: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.record(TransportOp::Delete, path, None);
        state.injected(TransportOp::Delete, path)?;
        state
            .objects
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| TransportError::not_found(TransportOp::Delete, path))
    }

    async fn move_to(&self, path: &str, dest: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.record(TransportOp::Move, path, Some(dest));
        if let Some(fault) = state.take_fault(TransportOp::Move, path) {
            if fault.drops_source {
                state.objects.remove(path);
            }
            return Err(TransportError::new(fault.kind, TransportOp::Move, path, "injected failure"));
        }
        let bytes = state
            .objects
            .remove(path)
            .ok_or_else(|| TransportError::not_found(TransportOp::Move, path))?;
        state.objects.insert(dest.to_string(), bytes);
        Ok(())
    }
}
