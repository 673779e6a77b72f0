//! Batch orchestration: one listing, one candidate set, bounded workers.

use crate::config::{CompressionLevel, Settings};
use crate::constants::PROGRESS_TEMPLATE;
use crate::control::RunControl;
use crate::eligibility::{EligibilityFilter, IneligibleReason};
use crate::error::{ReplaceError, Result, SqueezeError};
use crate::logger::is_quiet;
use crate::path_matcher::{basename, normalize_path, LogicalFolder};
use crate::replacer::{FileOutcome, FileReport, FolderLayout, ReplacePolicy, SafeReplacer};
use crate::selector::CompressionSelector;
use crate::stats::{RunStats, RunStatsAggregator};
use crate::storage::{RemoteEntry, RemoteStorage};
use crate::strategies::StrategySet;
use crate::utils::format_file_size;
use crate::workspace::ScratchArea;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Parameters of one run. Built from settings, then overridden by flags.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub level: CompressionLevel,
    pub max_files: usize,
    pub timeout: Option<Duration>,
    pub dry_run: bool,
    pub workers: usize,
}

impl RunRequest {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            level: settings.compression.default_level,
            max_files: settings.limits.max_files_per_run,
            timeout: Some(Duration::from_secs(settings.limits.run_timeout_secs)),
            dry_run: false,
            workers: settings.limits.workers,
        }
    }
}

/// The result of filtering one listing.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    /// Entries the listing returned, directories included.
    pub listed: usize,
    /// Eligible files, smallest first, at most `max_files`.
    pub candidates: Vec<RemoteEntry>,
    /// Eligible files beyond the cap.
    pub deferred: Vec<RemoteEntry>,
    pub ineligible: Vec<(RemoteEntry, IneligibleReason)>,
}

impl CandidateSet {
    pub fn eligible_count(&self) -> usize {
        self.candidates.len() + self.deferred.len()
    }
}

pub struct Pipeline {
    storage: Arc<dyn RemoteStorage>,
    settings: Settings,
    strategies: StrategySet,
    filter: EligibilityFilter,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(storage: Arc<dyn RemoteStorage>, settings: Settings) -> Result<Self> {
        let strategies = StrategySet::from_settings(&settings.compression)?;
        Self::with_strategies(storage, settings, strategies)
    }

    /// Uses `strategies` instead of the configured backends.
    pub fn with_strategies(
        storage: Arc<dyn RemoteStorage>,
        settings: Settings,
        strategies: StrategySet,
    ) -> Result<Self> {
        let report = settings.ensure_valid()?;
        for warning in &report.warnings {
            warn!("⚠️  {}", warning);
        }
        if let Some(warning) = strategies.structure_first_warning() {
            warn!("⚠️  {}", warning);
        }
        let filter = EligibilityFilter::new(
            settings.limits.min_file_size_kb,
            settings.limits.max_file_size_mb,
            &settings.filters.skip_patterns,
        )?;
        Ok(Self {
            storage,
            settings,
            strategies,
            filter,
            show_progress: true,
        })
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Folders below the input that hold our own output and must not be
    /// compressed again.
    fn excluded_folders(&self) -> Vec<&LogicalFolder> {
        let folders = &self.settings.folders;
        [Some(&folders.output), Some(&folders.backup), folders.archive.as_ref()]
            .into_iter()
            .flatten()
            .filter(|f| !f.same_as(&folders.input) && folders.input.contains(f.as_str()))
            .collect()
    }

    /// Lists the input folder once and builds the candidate set.
    pub async fn scan(&self, max_files: usize) -> Result<CandidateSet> {
        let input = &self.settings.folders.input;
        info!("🔍 Listing {} via {}", input.as_str(), self.storage.name());
        let entries = self
            .storage
            .list(input.as_str())
            .await
            .map_err(SqueezeError::Listing)?;

        let excluded = self.excluded_folders();
        let mut seen = HashSet::new();
        let mut set = CandidateSet {
            listed: entries.len(),
            ..CandidateSet::default()
        };
        let mut eligible = Vec::new();

        for entry in entries {
            if !input.contains(&entry.path) || excluded.iter().any(|f| f.contains(&entry.path)) {
                continue;
            }
            if entry.is_directory {
                continue;
            }
            if !seen.insert(normalize_path(&entry.path)) {
                debug!("Duplicate listing entry {}", entry.path);
                continue;
            }
            match self.filter.check(&entry) {
                Ok(()) => eligible.push(entry),
                Err(reason) => {
                    debug!("Skipping {}: {}", entry.path, reason);
                    set.ineligible.push((entry, reason));
                }
            }
        }

        eligible.sort_by(|a, b| a.size_bytes.cmp(&b.size_bytes).then_with(|| a.path.cmp(&b.path)));
        if eligible.len() > max_files {
            set.deferred = eligible.split_off(max_files);
        }
        set.candidates = eligible;
        Ok(set)
    }

    pub async fn run(&self, request: &RunRequest) -> Result<RunStats> {
        self.run_with_control(request, RunControl::new(request.timeout)).await
    }

    /// Runs with an externally owned control, so callers can raise the stop flag.
    pub async fn run_with_control(&self, request: &RunRequest, control: RunControl) -> Result<RunStats> {
        let mut stats = RunStatsAggregator::new(request.level, request.dry_run);
        let set = self.scan(request.max_files).await?;

        stats.record_listing(set.listed, set.eligible_count());
        for (entry, reason) in &set.ineligible {
            stats.record(&FileReport::new(entry, FileOutcome::SkippedIneligible(reason.clone())));
        }
        stats.record_deferred(&set.deferred);

        info!(
            "📊 Found {} eligible files, processing {}{}",
            set.eligible_count(),
            set.candidates.len(),
            if request.dry_run { " (dry run)" } else { "" }
        );
        if set.candidates.is_empty() {
            return Ok(stats.finish());
        }

        let workers = request.workers.max(1);
        let area = Arc::new(ScratchArea::new(self.settings.limits.work_dir.as_deref())?);
        if let Some(largest) = set.candidates.iter().map(|e| e.size_bytes).max() {
            if let Some(free) = area.preflight(largest, workers) {
                debug!("Scratch volume has {} free", format_file_size(free));
            }
        }

        let selector = CompressionSelector::new(
            self.strategies.clone(),
            self.settings.compression.min_compression_percent,
        );
        let replacer = Arc::new(SafeReplacer::new(
            Arc::clone(&self.storage),
            selector,
            FolderLayout::from_settings(&self.settings),
            self.settings.safety.original_disposition,
            ReplacePolicy::from_settings(&self.settings, request.dry_run),
            self.settings.compression.profile(request.level),
        ));

        let progress = self.progress_bar(set.candidates.len() as u64);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();
        let mut queue = set.candidates.into_iter();

        while let Some(entry) = queue.next() {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if control.should_stop() {
                drop(permit);
                warn!("⏱️  Run time limit reached, leaving remaining files for the next run");
                for skipped in std::iter::once(entry).chain(queue.by_ref()) {
                    stats.record(&FileReport::new(&skipped, FileOutcome::SkippedTimeout));
                    progress.inc(1);
                }
                break;
            }

            let replacer = Arc::clone(&replacer);
            let area = Arc::clone(&area);
            let control = control.clone();
            let progress = progress.clone();
            let tracked = entry.clone();
            let handle = tasks.spawn(async move {
                let _permit = permit;
                progress.set_message(basename(&entry.path).to_string());
                let report = match area.file_scratch() {
                    Ok(scratch) => replacer.process(&entry, &scratch, &control).await,
                    Err(e) => FileReport::new(
                        &entry,
                        FileOutcome::Failed {
                            error: ReplaceError::from(e),
                            rolled_back: true,
                        },
                    ),
                };
                progress.inc(1);
                report
            });
            in_flight.insert(handle.id(), tracked);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, report)) => {
                    in_flight.remove(&id);
                    stats.record(&report);
                }
                Err(e) => {
                    stats.record_error(format!("worker task failed: {}", e));
                    if let Some(entry) = in_flight.remove(&e.id()) {
                        warn!("❌ {}: worker task failed: {}", entry.path, e);
                        progress.inc(1);
                        // Stopped at an unknown stage.
                        stats.record(&FileReport::new(
                            &entry,
                            FileOutcome::Failed {
                                error: ReplaceError::Aborted(e.to_string()),
                                rolled_back: false,
                            },
                        ));
                    }
                }
            }
        }
        progress.finish_with_message("✅ Done");

        Ok(stats.finish())
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress || is_quiet() {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        match ProgressStyle::with_template(PROGRESS_TEMPLATE) {
            Ok(style) => bar.set_style(style.progress_chars("#>-")),
            Err(_) => bar.set_style(ProgressStyle::default_bar()),
        }
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::write_sample_pdf;
    use crate::storage::MemoryStorage;
    use crate::strategies::{CompressionStrategy, LopdfStrategy};

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.folders.input = LogicalFolder::new("/pdf/Input");
        settings.folders.output = LogicalFolder::new("/pdf/Input/Compressed");
        settings.folders.backup = LogicalFolder::new("/pdf/Backup");
        settings.limits.min_file_size_kb = 1;
        settings
    }

    fn pipeline(storage: Arc<MemoryStorage>, settings: Settings) -> Pipeline {
        let lopdf: Arc<dyn CompressionStrategy> = Arc::new(LopdfStrategy::new(Duration::from_secs(30)));
        Pipeline::with_strategies(storage, settings, StrategySet::single(vec![lopdf]))
            .unwrap()
            .with_progress(false)
    }

    fn sample(padding: usize) -> Vec<u8> {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("s.pdf");
        write_sample_pdf(&path, 1, padding);
        std::fs::read(path).unwrap()
    }

    #[tokio::test]
    async fn test_scan_filters_dedupes_sorts_and_caps() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("/pdf/Input/big.pdf", vec![0; 9000]);
        storage.insert("/pdf/Input/small.pdf", vec![0; 2000]);
        storage.insert("/pdf/Input/mid.PDF", vec![0; 5000]);
        storage.insert("/pdf/Input/notes.txt", vec![0; 5000]);
        storage.insert("/pdf/Input/tiny.pdf", vec![0; 10]);
        storage.insert("/pdf/Input/Compressed/old.pdf", vec![0; 5000]);
        storage.insert("/pdf/InputBackup/x.pdf", vec![0; 5000]);
        storage.add_listing_entry(RemoteEntry::file("/PDF/INPUT/small.pdf/", 2000));

        let set = pipeline(storage, settings()).scan(2).await.unwrap();
        let paths: Vec<&str> = set.candidates.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/pdf/Input/small.pdf", "/pdf/Input/mid.PDF"]);
        assert_eq!(set.deferred.len(), 1);
        assert_eq!(set.deferred[0].path, "/pdf/Input/big.pdf");
        assert_eq!(set.ineligible.len(), 2);
        assert!(set
            .ineligible
            .iter()
            .all(|(e, _)| e.path.ends_with("notes.txt") || e.path.ends_with("tiny.pdf")));
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let storage = Arc::new(MemoryStorage::new());
        storage.fail(
            crate::error::TransportOp::List,
            None,
            crate::error::TransportErrorKind::AuthExpired,
        );
        let result = pipeline(storage, settings()).run(&RunRequest::from_settings(&settings())).await;
        assert!(matches!(result, Err(SqueezeError::Listing(_))));
    }

    #[tokio::test]
    async fn test_expired_deadline_skips_every_candidate() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("/pdf/Input/a.pdf", sample(50_000));
        storage.insert("/pdf/Input/b.pdf", sample(60_000));
        let mut request = RunRequest::from_settings(&settings());
        request.timeout = Some(Duration::ZERO);

        let stats = pipeline(storage.clone(), settings()).run(&request).await.unwrap();
        assert_eq!(stats.skipped_timeout, 2);
        assert_eq!(stats.processed, 0);
        assert!(!stats.has_failures());
        assert!(storage.contains("/pdf/Input/a.pdf"));
        assert!(storage.contains("/pdf/Input/b.pdf"));
    }

    #[tokio::test]
    async fn test_run_compresses_into_nested_output_folder() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("/pdf/Input/a.pdf", sample(50_000));
        storage.insert("/pdf/Input/sub/b.pdf", sample(80_000));

        let pipeline = pipeline(storage.clone(), settings());
        let stats = pipeline.run(&RunRequest::from_settings(&settings())).await.unwrap();
        assert_eq!(stats.processed, 2);
        assert!(storage.contains("/pdf/Input/Compressed/a.pdf"));
        assert!(storage.contains("/pdf/Input/Compressed/sub/b.pdf"));
        assert!(storage.contains("/pdf/Backup/sub/b.pdf"));

        // The outputs sit inside the input folder but are never picked up again.
        let again = pipeline.run(&RunRequest::from_settings(&settings())).await.unwrap();
        assert_eq!(again.candidates, 0);
        assert_eq!(again.processed, 0);
        assert!(!again.has_failures());
    }
}
