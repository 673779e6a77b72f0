//! Replaces one remote original with its compressed version without ever
//! losing the original.
//!
//! Per-file work is an explicit state machine. [`transition`] decides what
//! comes after each step and is pure; [`SafeReplacer`] performs the steps
//! against the remote and the local scratch directory.
//!
//! ```text
//! Fetching -> Compressing -> Verifying -> BackingUp -> Uploading -> Finalizing
//!                  |             |            |            |            |
//!            NoImprovement    RollBack     RollBack     RollBack   Failed (upload kept)
//! ```
//!
//! Nothing remote changes before `BackingUp`, and the original is only removed
//! in `Finalizing`, after the upload was confirmed. Uploads land on a staging
//! name first and are moved onto the target once their size checks out, so a
//! failed upload never disturbs an object that already sat at the target.

use crate::config::{OriginalDisposition, Profile, Settings};
use crate::constants::STAGING_SUFFIX;
use crate::control::RunControl;
use crate::eligibility::IneligibleReason;
use crate::error::ReplaceError;
use crate::path_matcher::{basename, join_remote, normalize_path, LogicalFolder};
use crate::pdf;
use crate::selector::{verify_candidate, CompressionResult, CompressionSelector, Selection};
use crate::storage::{RemoteEntry, RemoteStorage};
use crate::workspace::FileScratch;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Final state of one file.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Compressed(CompressionResult),
    /// Dry run: the file would have been replaced with this result.
    WouldCompress(CompressionResult),
    SkippedIneligible(IneligibleReason),
    SkippedNoImprovement,
    SkippedTimeout,
    Failed { error: ReplaceError, rolled_back: bool },
}

impl FileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FileOutcome::Compressed(_) => "compressed",
            FileOutcome::WouldCompress(_) => "would_compress",
            FileOutcome::SkippedIneligible(_) => "skipped_ineligible",
            FileOutcome::SkippedNoImprovement => "skipped_no_improvement",
            FileOutcome::SkippedTimeout => "skipped_timeout",
            FileOutcome::Failed { .. } => "failed",
        }
    }

    pub fn result(&self) -> Option<&CompressionResult> {
        match self {
            FileOutcome::Compressed(result) | FileOutcome::WouldCompress(result) => Some(result),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FileOutcome::Failed { .. })
    }
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOutcome::Compressed(r) => {
                write!(f, "compressed with {} ({:.1}% saved)", r.winning_strategy, r.percent_saved)
            }
            FileOutcome::WouldCompress(r) => {
                write!(f, "would compress with {} ({:.1}% saved)", r.winning_strategy, r.percent_saved)
            }
            FileOutcome::SkippedIneligible(reason) => write!(f, "skipped: {}", reason),
            FileOutcome::SkippedNoImprovement => write!(f, "skipped: no acceptable compression"),
            FileOutcome::SkippedTimeout => write!(f, "skipped: run time limit reached"),
            FileOutcome::Failed { error, rolled_back } => {
                let state = if *rolled_back { "rolled back" } else { "not rolled back" };
                write!(f, "failed ({}): {}", state, error)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Compressing,
    Verifying,
    BackingUp,
    Uploading,
    Finalizing,
}

impl Stage {
    /// Stop requests are honored only before these steps; the commit phase
    /// runs to the end once started.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Stage::Fetching | Stage::Compressing | Stage::Verifying | Stage::BackingUp
        )
    }
}

#[derive(Debug)]
pub enum StepOutcome {
    Completed,
    NoImprovement,
    Cancelled,
    Failed(ReplaceError),
}

#[derive(Debug)]
pub enum Terminal {
    Replaced,
    DryRun,
    NoImprovement,
    TimedOut,
    Failed { error: ReplaceError, rolled_back: bool },
}

#[derive(Debug)]
pub enum Next {
    Enter(Stage),
    RollBack { failed_at: Stage, error: ReplaceError },
    Finish(Terminal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplacePolicy {
    pub backup_enabled: bool,
    pub verify_enabled: bool,
    pub dry_run: bool,
    pub rollback_on_error: bool,
}

impl ReplacePolicy {
    pub fn from_settings(settings: &Settings, dry_run: bool) -> Self {
        Self {
            backup_enabled: settings.safety.create_backup,
            verify_enabled: settings.safety.verify_compression,
            dry_run,
            rollback_on_error: settings.safety.rollback_on_error,
        }
    }

    fn after_verification(&self) -> Next {
        if self.dry_run {
            Next::Finish(Terminal::DryRun)
        } else if self.backup_enabled {
            Next::Enter(Stage::BackingUp)
        } else {
            Next::Enter(Stage::Uploading)
        }
    }
}

/// What follows `stage` given how it ended.
pub fn transition(stage: Stage, outcome: StepOutcome, policy: &ReplacePolicy) -> Next {
    match (stage, outcome) {
        (_, StepOutcome::Cancelled) => Next::Finish(Terminal::TimedOut),
        (_, StepOutcome::NoImprovement) => Next::Finish(Terminal::NoImprovement),

        (Stage::Fetching, StepOutcome::Completed) => Next::Enter(Stage::Compressing),
        (Stage::Compressing, StepOutcome::Completed) if policy.verify_enabled => {
            Next::Enter(Stage::Verifying)
        }
        (Stage::Compressing, StepOutcome::Completed) => policy.after_verification(),
        (Stage::Verifying, StepOutcome::Completed) => policy.after_verification(),
        (Stage::BackingUp, StepOutcome::Completed) => Next::Enter(Stage::Uploading),
        (Stage::Uploading, StepOutcome::Completed) => Next::Enter(Stage::Finalizing),
        (Stage::Finalizing, StepOutcome::Completed) => Next::Finish(Terminal::Replaced),

        // Only a local copy exists yet.
        (Stage::Fetching, StepOutcome::Failed(error)) => Next::Finish(Terminal::Failed {
            error,
            rolled_back: true,
        }),
        // The verified upload stays; original and replacement now coexist.
        (Stage::Finalizing, StepOutcome::Failed(error)) => Next::Finish(Terminal::Failed {
            error,
            rolled_back: false,
        }),
        (failed_at, StepOutcome::Failed(error)) if policy.rollback_on_error => {
            Next::RollBack { failed_at, error }
        }
        (failed_at, StepOutcome::Failed(error)) => Next::Finish(Terminal::Failed {
            error,
            rolled_back: failed_at != Stage::Uploading,
        }),
    }
}

/// Where a source file's replacement, backup and archived original go.
#[derive(Debug, Clone)]
pub struct FolderLayout {
    pub input: LogicalFolder,
    pub output: LogicalFolder,
    pub backup: LogicalFolder,
    pub archive: Option<LogicalFolder>,
    pub output_suffix: String,
}

impl FolderLayout {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            input: settings.folders.input.clone(),
            output: settings.folders.output.clone(),
            backup: settings.folders.backup.clone(),
            archive: settings.folders.archive.clone(),
            output_suffix: settings.filters.output_suffix.clone(),
        }
    }

    fn relative<'a>(&self, source: &'a str) -> Result<&'a str, ReplaceError> {
        self.input.relative(source).ok_or_else(|| {
            ReplaceError::SafetyViolation(format!("{} is outside {}", source, self.input.as_str()))
        })
    }

    pub fn target_path(&self, source: &str) -> Result<String, ReplaceError> {
        let relative = self.relative(source)?;
        Ok(join_remote(self.output.as_str(), &with_suffix(relative, &self.output_suffix)))
    }

    pub fn backup_path(&self, source: &str) -> Result<String, ReplaceError> {
        Ok(join_remote(self.backup.as_str(), self.relative(source)?))
    }

    pub fn archive_path(&self, source: &str) -> Result<String, ReplaceError> {
        let archive = self
            .archive
            .as_ref()
            .ok_or_else(|| ReplaceError::SafetyViolation("no archive folder configured".to_string()))?;
        Ok(join_remote(archive.as_str(), self.relative(source)?))
    }
}

/// Inserts `suffix` before the extension of the last path component.
fn with_suffix(relative: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return relative.to_string();
    }
    let name = basename(relative);
    let parent = &relative[..relative.len() - name.len()];
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}{}{}{}", parent, &name[..dot], suffix, &name[dot..]),
        _ => format!("{}{}{}", parent, name, suffix),
    }
}

/// Everything one file accumulates on its way through the stages.
struct FileJob<'a> {
    entry: &'a RemoteEntry,
    scratch: &'a FileScratch,
    target: String,
    in_place: bool,
    local_original: PathBuf,
    original_size: u64,
    accepted: Option<(CompressionResult, PathBuf)>,
    attempts: Vec<String>,
    backed_up: bool,
    staging: Option<String>,
    promoting: bool,
    uploaded: Option<RemoteEntry>,
}

/// Outcome of one file plus what the pipeline reports about it.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: String,
    pub size_bytes: u64,
    pub outcome: FileOutcome,
    pub attempts: Vec<String>,
    pub elapsed: Duration,
}

impl FileReport {
    pub fn new(entry: &RemoteEntry, outcome: FileOutcome) -> Self {
        Self {
            path: entry.path.clone(),
            size_bytes: entry.size_bytes,
            outcome,
            attempts: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

pub struct SafeReplacer {
    storage: Arc<dyn RemoteStorage>,
    selector: CompressionSelector,
    layout: FolderLayout,
    disposition: OriginalDisposition,
    policy: ReplacePolicy,
    profile: Profile,
}

impl SafeReplacer {
    pub fn new(
        storage: Arc<dyn RemoteStorage>,
        selector: CompressionSelector,
        layout: FolderLayout,
        disposition: OriginalDisposition,
        policy: ReplacePolicy,
        profile: Profile,
    ) -> Self {
        Self {
            storage,
            selector,
            layout,
            disposition,
            policy,
            profile,
        }
    }

    /// Runs one candidate through every stage. Never returns an error: all
    /// failures end up in the report's outcome.
    pub async fn process(&self, entry: &RemoteEntry, scratch: &FileScratch, control: &RunControl) -> FileReport {
        let started = Instant::now();
        let mut report = FileReport::new(entry, FileOutcome::SkippedTimeout);

        let target = match self.layout.target_path(&entry.path) {
            Ok(target) => target,
            Err(error) => {
                report.outcome = FileOutcome::Failed {
                    error,
                    rolled_back: true,
                };
                return report;
            }
        };
        let in_place = normalize_path(&target) == normalize_path(&entry.path);

        let mut job = FileJob {
            entry,
            scratch,
            target,
            in_place,
            local_original: scratch.original(basename(&entry.path)),
            original_size: entry.size_bytes,
            accepted: None,
            attempts: Vec::new(),
            backed_up: false,
            staging: None,
            promoting: false,
            uploaded: None,
        };

        let mut stage = Stage::Fetching;
        let terminal = loop {
            let outcome = if stage.is_cancellable() && control.should_stop() {
                StepOutcome::Cancelled
            } else {
                self.run_step(stage, &mut job).await
            };
            debug!("{} {:?} -> {:?}", entry.path, stage, outcome);

            match transition(stage, outcome, &self.policy) {
                Next::Enter(next) => stage = next,
                Next::RollBack { failed_at, error } => {
                    warn!("⚠️  {} failed while {:?}: {}", entry.path, failed_at, error);
                    let rolled_back = self.roll_back(failed_at, &job).await;
                    break Terminal::Failed { error, rolled_back };
                }
                Next::Finish(terminal) => break terminal,
            }
        };

        report.outcome = match terminal {
            Terminal::Replaced => match job.accepted.take() {
                Some((result, _)) => FileOutcome::Compressed(result),
                None => FileOutcome::Failed {
                    error: ReplaceError::SafetyViolation("replaced without a result".to_string()),
                    rolled_back: false,
                },
            },
            Terminal::DryRun => match job.accepted.take() {
                Some((result, _)) => FileOutcome::WouldCompress(result),
                None => FileOutcome::SkippedNoImprovement,
            },
            Terminal::NoImprovement => FileOutcome::SkippedNoImprovement,
            Terminal::TimedOut => FileOutcome::SkippedTimeout,
            Terminal::Failed { error, rolled_back } => FileOutcome::Failed { error, rolled_back },
        };
        report.attempts = job.attempts;
        report.elapsed = started.elapsed();

        match &report.outcome {
            FileOutcome::Failed { .. } => warn!("❌ {}: {}", entry.path, report.outcome),
            _ => info!("📄 {}: {}", entry.path, report.outcome),
        }
        report
    }

    async fn run_step(&self, stage: Stage, job: &mut FileJob<'_>) -> StepOutcome {
        let result = match stage {
            Stage::Fetching => self.fetch(job).await,
            Stage::Compressing => return self.compress(job).await,
            Stage::Verifying => self.verify(job).await,
            Stage::BackingUp => self.back_up(job).await,
            Stage::Uploading => self.upload(job).await,
            Stage::Finalizing => self.finalize(job).await,
        };
        match result {
            Ok(()) => StepOutcome::Completed,
            Err(error) => StepOutcome::Failed(error),
        }
    }

    async fn fetch(&self, job: &mut FileJob<'_>) -> Result<(), ReplaceError> {
        let size = self.storage.download(&job.entry.path, &job.local_original).await?;
        if size != job.entry.size_bytes {
            debug!(
                "{} changed since listing: {} -> {} bytes",
                job.entry.path, job.entry.size_bytes, size
            );
        }
        job.original_size = size;
        Ok(())
    }

    async fn compress(&self, job: &mut FileJob<'_>) -> StepOutcome {
        let selection = self
            .selector
            .select(&job.local_original, job.scratch.path(), &self.profile)
            .await;
        job.attempts = selection.attempts().iter().map(|a| a.to_string()).collect();

        match selection {
            Selection::Accepted { result, artifact, .. } => {
                job.accepted = Some((result, artifact));
                StepOutcome::Completed
            }
            Selection::NoAcceptableResult { attempts } => {
                for attempt in &attempts {
                    debug!("  {}", attempt);
                }
                StepOutcome::NoImprovement
            }
        }
    }

    async fn verify(&self, job: &mut FileJob<'_>) -> Result<(), ReplaceError> {
        let (result, artifact) = accepted(job)?;
        let original = pdf::inspect(&job.local_original).await?;
        let candidate = verify_candidate(&original, artifact, self.selector.min_percent()).await?;
        if candidate.size_bytes != result.compressed_size {
            return Err(ReplaceError::Io(format!(
                "artifact changed on disk: {} bytes, selected {}",
                candidate.size_bytes, result.compressed_size
            )));
        }
        Ok(())
    }

    async fn back_up(&self, job: &mut FileJob<'_>) -> Result<(), ReplaceError> {
        let dest = self.layout.backup_path(&job.entry.path)?;
        let stored = self.storage.upload(&job.local_original, &dest).await?;
        confirm_size(&stored, job.original_size)?;
        debug!("Backed up {} to {}", job.entry.path, dest);
        job.backed_up = true;
        Ok(())
    }

    async fn upload(&self, job: &mut FileJob<'_>) -> Result<(), ReplaceError> {
        if job.in_place && !job.backed_up {
            return Err(ReplaceError::SafetyViolation(format!(
                "refusing to overwrite {} without a backup",
                job.entry.path
            )));
        }
        let (result, artifact) = accepted(job)?;
        let expected = result.compressed_size;
        let artifact = artifact.clone();
        let staging = format!("{}{}", job.target, STAGING_SUFFIX);

        job.staging = Some(staging.clone());
        let stored = self.storage.upload(&artifact, &staging).await?;
        confirm_size(&stored, expected)?;

        job.promoting = true;
        self.storage.move_to(&staging, &job.target).await?;
        debug!("Promoted {} to {}", staging, job.target);
        job.uploaded = Some(RemoteEntry::file(job.target.clone(), stored.size_bytes));
        Ok(())
    }

    async fn finalize(&self, job: &mut FileJob<'_>) -> Result<(), ReplaceError> {
        let expected = accepted(job)?.0.compressed_size;
        match &job.uploaded {
            Some(stored) if stored.size_bytes == expected => {}
            _ => {
                return Err(ReplaceError::SafetyViolation(format!(
                    "no confirmed upload for {}, original kept",
                    job.entry.path
                )))
            }
        }

        if job.in_place {
            // The upload already replaced the original; its bytes live in the backup.
            return Ok(());
        }
        match self.disposition {
            OriginalDisposition::Delete => self.storage.delete(&job.entry.path).await?,
            OriginalDisposition::Archive => {
                let dest = self.layout.archive_path(&job.entry.path)?;
                self.storage.move_to(&job.entry.path, &dest).await?
            }
        }
        Ok(())
    }

    /// Reverts what can be reverted after `failed_at`. Returns whether the
    /// remote is back in its pre-file state. Backups are left in place.
    async fn roll_back(&self, failed_at: Stage, job: &FileJob<'_>) -> bool {
        if failed_at != Stage::Uploading {
            return true;
        }
        let Some(staging) = &job.staging else {
            // Refused before anything was written.
            return true;
        };

        match self.storage.delete(staging).await {
            Ok(()) => {
                // The staged copy was still there, so the target was never touched.
                info!("↩️  Removed staged upload {}", staging);
                true
            }
            Err(e) if e.is_not_found() && !job.promoting => true,
            Err(e) if e.is_not_found() => self.recover_interrupted_promotion(job).await,
            Err(e) => {
                warn!("⚠️  Could not remove staged upload {}: {}", staging, e);
                false
            }
        }
    }

    /// The move onto the target failed after the staged copy left its place.
    /// In place, the original is restored from the local copy; elsewhere the
    /// target now holds the replacement and the original is still intact.
    async fn recover_interrupted_promotion(&self, job: &FileJob<'_>) -> bool {
        if !job.in_place {
            warn!(
                "⚠️  {} may already hold the replacement, original {} kept",
                job.target, job.entry.path
            );
            return false;
        }
        let restored = self
            .storage
            .upload(&job.local_original, &job.entry.path)
            .await
            .map_err(ReplaceError::from)
            .and_then(|stored| confirm_size(&stored, job.original_size));
        match restored {
            Ok(()) => {
                info!("↩️  Restored original {}", job.entry.path);
                true
            }
            Err(e) => {
                warn!("⚠️  Could not restore {}: {}", job.entry.path, e);
                false
            }
        }
    }
}

fn accepted<'j>(job: &'j FileJob<'_>) -> Result<(&'j CompressionResult, &'j PathBuf), ReplaceError> {
    job.accepted
        .as_ref()
        .map(|(result, artifact)| (result, artifact))
        .ok_or_else(|| ReplaceError::SafetyViolation("no accepted compression result".to_string()))
}

fn confirm_size(stored: &RemoteEntry, expected: u64) -> Result<(), ReplaceError> {
    if stored.size_bytes == expected {
        Ok(())
    } else {
        Err(ReplaceError::UploadMismatch {
            path: stored.path.clone(),
            expected,
            actual: stored.size_bytes,
        })
    }
}
