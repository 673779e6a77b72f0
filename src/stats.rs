//! Run statistics.
//!
//! The orchestrator loop is the only writer: it feeds each finished file into
//! a [`RunStatsAggregator`] and freezes it into [`RunStats`] at the end.

use crate::config::CompressionLevel;
use crate::error::Result;
use crate::replacer::{FileOutcome, FileReport};
use crate::storage::RemoteEntry;
use crate::utils::{format_duration, format_file_size, percent_saved};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use std::time::{Duration, Instant};

/// One file's line in the statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub size_bytes: u64,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_saved: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<String>,
    pub elapsed_ms: u64,
}

impl From<&FileReport> for FileRecord {
    fn from(report: &FileReport) -> Self {
        let result = report.outcome.result();
        let (detail, rolled_back) = match &report.outcome {
            FileOutcome::SkippedIneligible(reason) => (Some(reason.to_string()), None),
            FileOutcome::Failed { error, rolled_back } => (Some(error.to_string()), Some(*rolled_back)),
            _ => (None, None),
        };
        Self {
            path: report.path.clone(),
            size_bytes: report.size_bytes,
            outcome: report.outcome.label().to_string(),
            detail,
            strategy: result.map(|r| r.winning_strategy.clone()),
            compressed_size: result.map(|r| r.compressed_size),
            percent_saved: result.map(|r| r.percent_saved),
            rolled_back,
            attempts: report.attempts.clone(),
            elapsed_ms: report.elapsed.as_millis() as u64,
        }
    }
}

/// Frozen summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub level: CompressionLevel,
    pub dry_run: bool,
    pub listed: usize,
    pub candidates: usize,
    pub processed: usize,
    pub would_compress: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub skipped_ineligible: usize,
    pub skipped_no_improvement: usize,
    pub skipped_timeout: usize,
    pub deferred: usize,
    /// Sizes of the files that were (or in a dry run would be) replaced.
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub percent_saved: f64,
    pub files: Vec<FileRecord>,
    pub errors: Vec<String>,
}

impl RunStats {
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || !self.errors.is_empty()
    }

    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let title = if self.dry_run {
            "📊 Dry Run Summary:"
        } else {
            "📊 Compression Summary:"
        };
        let _ = writeln!(out, "\n{}", title);
        let _ = writeln!(out, "  📁 Files listed: {} ({} candidates)", self.listed, self.candidates);
        if self.dry_run {
            let _ = writeln!(out, "  🔍 Would compress: {}", self.would_compress);
        } else {
            let _ = writeln!(out, "  ✅ Compressed: {}", self.processed);
        }
        let _ = writeln!(
            out,
            "  ⏭️  Skipped: {} ineligible, {} no improvement, {} time limit",
            self.skipped_ineligible, self.skipped_no_improvement, self.skipped_timeout
        );
        if self.deferred > 0 {
            let _ = writeln!(out, "  📦 Deferred to next run: {}", self.deferred);
        }
        let _ = writeln!(out, "  📊 Original size: {}", format_file_size(self.bytes_before));
        let _ = writeln!(out, "  📊 Compressed size: {}", format_file_size(self.bytes_after));
        let _ = writeln!(
            out,
            "  🎯 Saved: {} ({:.1}%)",
            format_file_size(self.bytes_saved()),
            self.percent_saved
        );
        let _ = writeln!(
            out,
            "  ⏱️  Total time: {}",
            format_duration(Duration::from_secs_f64(self.duration_secs.max(0.0)))
        );
        if self.failed > 0 {
            let _ = writeln!(
                out,
                "  ⚠️  Failed files: {} ({} rolled back)",
                self.failed, self.rolled_back
            );
        }
        for error in &self.errors {
            let _ = writeln!(out, "  ❌ {}", error);
        }
        out
    }
}

pub struct RunStatsAggregator {
    started_at: DateTime<Utc>,
    started: Instant,
    level: CompressionLevel,
    dry_run: bool,
    listed: usize,
    candidates: usize,
    deferred: usize,
    bytes_before: u64,
    bytes_after: u64,
    counts: Counts,
    files: Vec<FileRecord>,
    errors: Vec<String>,
}

#[derive(Default)]
struct Counts {
    processed: usize,
    would_compress: usize,
    failed: usize,
    rolled_back: usize,
    skipped_ineligible: usize,
    skipped_no_improvement: usize,
    skipped_timeout: usize,
}

impl RunStatsAggregator {
    pub fn new(level: CompressionLevel, dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            level,
            dry_run,
            listed: 0,
            candidates: 0,
            deferred: 0,
            bytes_before: 0,
            bytes_after: 0,
            counts: Counts::default(),
            files: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn record_listing(&mut self, listed: usize, candidates: usize) {
        self.listed = listed;
        self.candidates = candidates;
    }

    /// Candidates left for a later run by the per-run file cap.
    pub fn record_deferred(&mut self, entries: &[RemoteEntry]) {
        self.deferred += entries.len();
        self.files.extend(entries.iter().map(|entry| FileRecord {
            path: entry.path.clone(),
            size_bytes: entry.size_bytes,
            outcome: "deferred".to_string(),
            detail: None,
            strategy: None,
            compressed_size: None,
            percent_saved: None,
            rolled_back: None,
            attempts: Vec::new(),
            elapsed_ms: 0,
        }));
    }

    /// A run-level problem that did not belong to a single file.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn record(&mut self, report: &FileReport) {
        let counts = &mut self.counts;
        match &report.outcome {
            FileOutcome::Compressed(_) => counts.processed += 1,
            FileOutcome::WouldCompress(_) => counts.would_compress += 1,
            FileOutcome::SkippedIneligible(_) => counts.skipped_ineligible += 1,
            FileOutcome::SkippedNoImprovement => counts.skipped_no_improvement += 1,
            FileOutcome::SkippedTimeout => counts.skipped_timeout += 1,
            FileOutcome::Failed { rolled_back, .. } => {
                counts.failed += 1;
                if *rolled_back {
                    counts.rolled_back += 1;
                }
            }
        }
        if let Some(result) = report.outcome.result() {
            self.bytes_before += result.original_size;
            self.bytes_after += result.compressed_size;
        }
        self.files.push(FileRecord::from(report));
    }

    pub fn finish(self) -> RunStats {
        let duration = self.started.elapsed();
        RunStats {
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_secs: duration.as_secs_f64(),
            level: self.level,
            dry_run: self.dry_run,
            listed: self.listed,
            candidates: self.candidates,
            processed: self.counts.processed,
            would_compress: self.counts.would_compress,
            failed: self.counts.failed,
            rolled_back: self.counts.rolled_back,
            skipped_ineligible: self.counts.skipped_ineligible,
            skipped_no_improvement: self.counts.skipped_no_improvement,
            skipped_timeout: self.counts.skipped_timeout,
            deferred: self.deferred,
            bytes_before: self.bytes_before,
            bytes_after: self.bytes_after,
            percent_saved: percent_saved(self.bytes_before, self.bytes_after),
            files: self.files,
            errors: self.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::IneligibleReason;
    use crate::error::ReplaceError;
    use crate::selector::CompressionResult;

    fn report(path: &str, size: u64, outcome: FileOutcome) -> FileReport {
        FileReport::new(&RemoteEntry::file(path, size), outcome)
    }

    fn result(original: u64, compressed: u64) -> CompressionResult {
        CompressionResult {
            winning_strategy: "qpdf".to_string(),
            original_size: original,
            compressed_size: compressed,
            percent_saved: percent_saved(original, compressed),
        }
    }

    #[test]
    fn test_counts_and_bytes() {
        let mut aggregator = RunStatsAggregator::new(CompressionLevel::Medium, false);
        aggregator.record_listing(6, 4);
        aggregator.record(&report("/a.pdf", 1000, FileOutcome::Compressed(result(1000, 400))));
        aggregator.record(&report("/b.pdf", 3000, FileOutcome::Compressed(result(3000, 1600))));
        aggregator.record(&report("/c.pdf", 10, FileOutcome::SkippedIneligible(IneligibleReason::NotPdf)));
        aggregator.record(&report("/d.pdf", 500, FileOutcome::SkippedNoImprovement));
        aggregator.record(&report(
            "/e.pdf",
            700,
            FileOutcome::Failed {
                error: ReplaceError::Io("disk full".to_string()),
                rolled_back: true,
            },
        ));
        aggregator.record_deferred(&[RemoteEntry::file("/f.pdf", 900), RemoteEntry::file("/g.pdf", 901)]);

        let stats = aggregator.finish();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.rolled_back, 1);
        assert_eq!(stats.skipped_ineligible, 1);
        assert_eq!(stats.skipped_no_improvement, 1);
        assert_eq!(stats.deferred, 2);
        assert_eq!(stats.bytes_before, 4000);
        assert_eq!(stats.bytes_after, 2000);
        assert!((stats.percent_saved - 50.0).abs() < f64::EPSILON);
        assert!(stats.has_failures());
        assert_eq!(stats.files.len(), 7);
        assert_eq!(stats.files[4].detail.as_deref(), Some("local I/O error: disk full"));
        assert_eq!(stats.files[6].outcome, "deferred");
    }

    #[test]
    fn test_json_round_trip() {
        let mut aggregator = RunStatsAggregator::new(CompressionLevel::High, true);
        aggregator.record(&report("/a.pdf", 1000, FileOutcome::WouldCompress(result(1000, 500))));
        let stats = aggregator.finish();
        assert!(!stats.has_failures());

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reports/stats.json");
        stats.write_json(&path).unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"would_compress\""));
        assert!(json.contains("\"level\": \"high\""));
        let parsed: RunStats = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.would_compress, 1);
        assert_eq!(parsed.files[0].strategy.as_deref(), Some("qpdf"));
    }

    #[test]
    fn test_summary_mentions_failures_and_deferred() {
        let mut aggregator = RunStatsAggregator::new(CompressionLevel::Low, false);
        aggregator.record_deferred(&[
            RemoteEntry::file("/a.pdf", 1),
            RemoteEntry::file("/b.pdf", 2),
            RemoteEntry::file("/c.pdf", 3),
        ]);
        aggregator.record_error("listing was truncated");
        let summary = aggregator.finish().render_summary();
        assert!(summary.contains("Deferred to next run: 3"));
        assert!(summary.contains("listing was truncated"));
    }
}
