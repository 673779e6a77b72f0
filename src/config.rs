//! Settings file (`config/settings.toml`) and compression profiles.
//!
//! Every field has a default, so an empty file is a valid configuration.

use crate::constants::*;
use crate::error::{Result, SqueezeError};
use crate::path_matcher::LogicalFolder;
use crate::strategies::strategy_key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Low,
    Medium,
    High,
}

impl CompressionLevel {
    pub const ALL: [CompressionLevel; 3] = [
        CompressionLevel::Low,
        CompressionLevel::Medium,
        CompressionLevel::High,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionLevel::Low => "low",
            CompressionLevel::Medium => "medium",
            CompressionLevel::High => "high",
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionLevel {
    type Err = SqueezeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(CompressionLevel::Low),
            "medium" => Ok(CompressionLevel::Medium),
            "high" => Ok(CompressionLevel::High),
            _ => Err(SqueezeError::UnknownLevel(s.to_string())),
        }
    }
}

/// Backend parameters for one quality tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub ghostscript_preset: String,
    pub image_resolution: u32,
    pub image_quality: u8,
    pub downsample_images: bool,
    pub qpdf_compression_level: u8,
    pub object_streams: bool,
}

impl Profile {
    pub fn preset(level: CompressionLevel) -> Self {
        match level {
            CompressionLevel::Low => Self {
                ghostscript_preset: "printer".to_string(),
                image_resolution: 300,
                image_quality: 90,
                downsample_images: false,
                qpdf_compression_level: 6,
                object_streams: false,
            },
            CompressionLevel::Medium => Self {
                ghostscript_preset: "ebook".to_string(),
                image_resolution: 150,
                image_quality: 75,
                downsample_images: true,
                qpdf_compression_level: 9,
                object_streams: true,
            },
            CompressionLevel::High => Self {
                ghostscript_preset: "screen".to_string(),
                image_resolution: 72,
                image_quality: 50,
                downsample_images: true,
                qpdf_compression_level: 9,
                object_streams: true,
            },
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Profile::preset(CompressionLevel::Medium)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderSettings {
    pub input: LogicalFolder,
    pub output: LogicalFolder,
    pub backup: LogicalFolder,
    pub archive: Option<LogicalFolder>,
}

impl Default for FolderSettings {
    fn default() -> Self {
        Self {
            input: LogicalFolder::new(DEFAULT_INPUT_FOLDER),
            output: LogicalFolder::new(DEFAULT_OUTPUT_FOLDER),
            backup: LogicalFolder::new(DEFAULT_BACKUP_FOLDER),
            archive: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Rclone,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub remote: String,
    pub rclone_bin: String,
    pub retries: u32,
    /// Root directory when `backend = "local"`.
    pub root: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Rclone,
            remote: DEFAULT_RCLONE_REMOTE.to_string(),
            rclone_bin: DEFAULT_RCLONE_BIN.to_string(),
            retries: DEFAULT_TRANSPORT_RETRIES,
            root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub default_level: CompressionLevel,
    pub min_compression_percent: f64,
    pub strategy_order: Vec<String>,
    pub structure_first_order: Vec<String>,
    pub ghostscript_bin: String,
    pub qpdf_bin: String,
    pub backend_timeout_secs: u64,
    pub levels: BTreeMap<CompressionLevel, Profile>,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            default_level: CompressionLevel::Medium,
            min_compression_percent: DEFAULT_MIN_COMPRESSION_PERCENT,
            strategy_order: vec![
                STRATEGY_GHOSTSCRIPT.to_string(),
                STRATEGY_QPDF.to_string(),
                STRATEGY_LOPDF.to_string(),
            ],
            structure_first_order: vec![
                STRATEGY_QPDF.to_string(),
                STRATEGY_LOPDF.to_string(),
                STRATEGY_GHOSTSCRIPT.to_string(),
            ],
            ghostscript_bin: DEFAULT_GHOSTSCRIPT_BIN.to_string(),
            qpdf_bin: DEFAULT_QPDF_BIN.to_string(),
            backend_timeout_secs: DEFAULT_BACKEND_TIMEOUT_SECS,
            levels: CompressionLevel::ALL
                .iter()
                .map(|level| (*level, Profile::preset(*level)))
                .collect(),
        }
    }
}

impl CompressionSettings {
    /// Profile for `level`, falling back to the built-in preset.
    pub fn profile(&self, level: CompressionLevel) -> Profile {
        self.levels
            .get(&level)
            .cloned()
            .unwrap_or_else(|| Profile::preset(level))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub max_files_per_run: usize,
    pub max_file_size_mb: u64,
    pub min_file_size_kb: u64,
    pub run_timeout_secs: u64,
    pub workers: usize,
    pub work_dir: Option<PathBuf>,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_files_per_run: DEFAULT_MAX_FILES_PER_RUN,
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            min_file_size_kb: DEFAULT_MIN_FILE_SIZE_KB,
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
            workers: DEFAULT_WORKERS,
            work_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub skip_patterns: Vec<String>,
    /// Appended to the file stem of uploaded outputs, e.g. `_compressed`.
    pub output_suffix: String,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            skip_patterns: DEFAULT_SKIP_PATTERNS.iter().map(|p| p.to_string()).collect(),
            output_suffix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginalDisposition {
    Delete,
    Archive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySettings {
    pub create_backup: bool,
    pub verify_compression: bool,
    pub rollback_on_error: bool,
    pub original_disposition: OriginalDisposition,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            create_backup: true,
            verify_compression: true,
            rollback_on_error: true,
            original_disposition: OriginalDisposition::Delete,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub folders: FolderSettings,
    pub storage: StorageSettings,
    pub compression: CompressionSettings,
    pub limits: LimitSettings,
    pub filters: FilterSettings,
    pub safety: SafetySettings,
}

/// Problems found by [`Settings::validate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SqueezeError::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_toml(&content)?;
        info!("📋 Loaded configuration from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// True when outputs are written over the originals.
    pub fn replaces_in_place(&self) -> bool {
        self.folders.output.same_as(&self.folders.input) && self.filters.output_suffix.is_empty()
    }

    pub fn validate(&self) -> ConfigReport {
        let mut report = ConfigReport::default();
        let compression = &self.compression;

        if compression.strategy_order.is_empty() {
            report.errors.push("compression.strategy_order is empty".to_string());
        }
        for name in compression
            .strategy_order
            .iter()
            .chain(compression.structure_first_order.iter())
        {
            if !KNOWN_STRATEGIES.contains(&strategy_key(name).as_str()) {
                report.errors.push(format!(
                    "unknown strategy '{}' (expected one of {})",
                    name,
                    KNOWN_STRATEGIES.join(", ")
                ));
            }
        }

        if !(0.0..100.0).contains(&compression.min_compression_percent) {
            report.errors.push(format!(
                "compression.min_compression_percent must be in [0, 100), got {}",
                compression.min_compression_percent
            ));
        }

        for level in CompressionLevel::ALL {
            if !compression.levels.contains_key(&level) {
                report
                    .warnings
                    .push(format!("profile '{}' not configured, using built-in preset", level));
            }
        }
        for (level, profile) in &compression.levels {
            if !(1..=100).contains(&profile.image_quality) {
                report.errors.push(format!(
                    "compression.levels.{}.image_quality must be between 1 and 100",
                    level
                ));
            }
            if profile.qpdf_compression_level > 9 {
                report.errors.push(format!(
                    "compression.levels.{}.qpdf_compression_level must be at most 9",
                    level
                ));
            }
        }

        let limits = &self.limits;
        if limits.max_file_size_mb == 0 {
            report.errors.push("limits.max_file_size_mb must be greater than 0".to_string());
        }
        if limits.min_file_size_kb.saturating_mul(1024)
            > limits.max_file_size_mb.saturating_mul(1024 * 1024)
        {
            report
                .errors
                .push("limits.min_file_size_kb exceeds limits.max_file_size_mb".to_string());
        }
        if limits.max_files_per_run == 0 {
            report
                .warnings
                .push("limits.max_files_per_run is 0, runs will process nothing".to_string());
        }
        if limits.workers == 0 {
            report.errors.push("limits.workers must be at least 1".to_string());
        } else if limits.workers > num_cpus::get() {
            report.warnings.push(format!(
                "limits.workers is {} but only {} CPUs are available, backends will compete for them",
                limits.workers,
                num_cpus::get()
            ));
        }
        if limits.run_timeout_secs == 0 {
            report.errors.push("limits.run_timeout_secs must be greater than 0".to_string());
        }

        for pattern in &self.filters.skip_patterns {
            if let Err(e) = glob::Pattern::new(pattern) {
                report
                    .errors
                    .push(format!("invalid skip pattern '{}': {}", pattern, e));
            }
        }

        let folders = &self.folders;
        if self.replaces_in_place() && !self.safety.create_backup {
            report.errors.push(
                "output folder equals input folder without an output suffix; \
                 in-place replacement requires safety.create_backup"
                    .to_string(),
            );
        }
        if self.safety.create_backup && folders.backup.same_as(&folders.input) {
            report
                .errors
                .push("folders.backup must differ from folders.input".to_string());
        }
        match (&self.safety.original_disposition, &folders.archive) {
            (OriginalDisposition::Archive, None) => report.errors.push(
                "safety.original_disposition = \"archive\" requires folders.archive".to_string(),
            ),
            (OriginalDisposition::Archive, Some(archive)) if archive.same_as(&folders.input) => {
                report
                    .errors
                    .push("folders.archive must differ from folders.input".to_string())
            }
            _ => {}
        }

        if !self.safety.verify_compression {
            report
                .warnings
                .push("safety.verify_compression is off, artifacts are not re-checked before upload".to_string());
        }
        if self.storage.backend == StorageBackend::Local && self.storage.root.is_none() {
            report
                .errors
                .push("storage.root is required when storage.backend = \"local\"".to_string());
        }

        report
    }

    /// Validates and turns errors into [`SqueezeError::InvalidConfig`].
    pub fn ensure_valid(&self) -> Result<ConfigReport> {
        let report = self.validate();
        if report.is_ok() {
            Ok(report)
        } else {
            Err(SqueezeError::InvalidConfig(report.errors.clone()))
        }
    }
}
