pub const DEFAULT_CONFIG_PATH: &str = "config/settings.toml";

pub const DEFAULT_INPUT_FOLDER: &str = "/pdf/Input";
pub const DEFAULT_OUTPUT_FOLDER: &str = "/pdf/Compressed";
pub const DEFAULT_BACKUP_FOLDER: &str = "/pdf/Backup";

pub const DEFAULT_RCLONE_REMOTE: &str = "mega";
pub const DEFAULT_RCLONE_BIN: &str = "rclone";
pub const DEFAULT_TRANSPORT_RETRIES: u32 = 2;
pub const TRANSPORT_RETRY_DELAY_SECS: u64 = 5;
pub const TRANSPORT_COMMAND_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_GHOSTSCRIPT_BIN: &str = "gs";
pub const DEFAULT_QPDF_BIN: &str = "qpdf";
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 300;
pub const PROBE_TIMEOUT_SECS: u64 = 10;

/// qpdf exits with 3 when the operation succeeded with warnings.
pub const QPDF_EXIT_WARNINGS: i32 = 3;

pub const DEFAULT_MIN_COMPRESSION_PERCENT: f64 = 5.0;
pub const DEFAULT_MAX_FILES_PER_RUN: usize = 50;
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 200;
pub const DEFAULT_MIN_FILE_SIZE_KB: u64 = 100;
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 50 * 60;
pub const DEFAULT_WORKERS: usize = 2;

pub const STRATEGY_GHOSTSCRIPT: &str = "ghostscript";
pub const STRATEGY_QPDF: &str = "qpdf";
pub const STRATEGY_LOPDF: &str = "lopdf";
pub const KNOWN_STRATEGIES: &[&str] = &[STRATEGY_GHOSTSCRIPT, STRATEGY_QPDF, STRATEGY_LOPDF];

pub const PDF_EXTENSION: &str = "pdf";

/// Appended to a target path while its upload is unconfirmed.
pub const STAGING_SUFFIX: &str = ".partial";

/// Image-heavy documents above this size go to the default order even when
/// they carry forms or annotations.
pub const LARGE_IMAGE_DOCUMENT_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_SKIP_PATTERNS: &[&str] = &["*_compressed.pdf", "*.tmp", "~*"];

/// A file keeps its original name, its compressed copy, and a backup copy on
/// the scratch volume while in flight.
pub const SCRATCH_COPIES_PER_FILE: u64 = 3;

pub const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";
