use crate::constants::PDF_EXTENSION;
use crate::error::{Result, SqueezeError};
use crate::path_matcher::basename;
use crate::storage::RemoteEntry;
use crate::utils::format_file_size;
use glob::{MatchOptions, Pattern};
use std::fmt;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Why a listed file is not a compression candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IneligibleReason {
    Directory,
    NotPdf,
    TooSmall { size: u64, min: u64 },
    TooLarge { size: u64, max: u64 },
    SkipPattern(String),
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::Directory => write!(f, "is a directory"),
            IneligibleReason::NotPdf => write!(f, "not a PDF file"),
            IneligibleReason::TooSmall { size, min } => write!(
                f,
                "too small ({} < {})",
                format_file_size(*size),
                format_file_size(*min)
            ),
            IneligibleReason::TooLarge { size, max } => write!(
                f,
                "too large ({} > {})",
                format_file_size(*size),
                format_file_size(*max)
            ),
            IneligibleReason::SkipPattern(pattern) => write!(f, "matches skip pattern {}", pattern),
        }
    }
}

/// Size bounds and skip patterns applied to every listed entry.
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    min_size_bytes: u64,
    max_size_bytes: u64,
    skip_patterns: Vec<Pattern>,
}

impl EligibilityFilter {
    /// Builds a filter from `[min_file_size_kb, max_file_size_mb]` and glob patterns.
    pub fn new(min_file_size_kb: u64, max_file_size_mb: u64, patterns: &[String]) -> Result<Self> {
        let skip_patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| SqueezeError::InvalidPattern {
                    pattern: p.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            min_size_bytes: min_file_size_kb.saturating_mul(1024),
            max_size_bytes: max_file_size_mb.saturating_mul(1024 * 1024),
            skip_patterns,
        })
    }

    pub fn is_eligible(&self, entry: &RemoteEntry) -> bool {
        self.check(entry).is_ok()
    }

    /// Checks an entry, reporting the first rule it breaks.
    pub fn check(&self, entry: &RemoteEntry) -> std::result::Result<(), IneligibleReason> {
        if entry.is_directory {
            return Err(IneligibleReason::Directory);
        }

        let name = basename(&entry.path);
        if !is_pdf_name(name) {
            return Err(IneligibleReason::NotPdf);
        }

        if let Some(pattern) = self.matching_pattern(name) {
            return Err(IneligibleReason::SkipPattern(pattern.as_str().to_string()));
        }

        if entry.size_bytes < self.min_size_bytes {
            return Err(IneligibleReason::TooSmall {
                size: entry.size_bytes,
                min: self.min_size_bytes,
            });
        }

        if entry.size_bytes > self.max_size_bytes {
            return Err(IneligibleReason::TooLarge {
                size: entry.size_bytes,
                max: self.max_size_bytes,
            });
        }

        Ok(())
    }

    fn matching_pattern(&self, name: &str) -> Option<&Pattern> {
        self.skip_patterns
            .iter()
            .find(|p| p.matches_with(name, MATCH_OPTIONS))
    }
}

/// Check if a file name carries the `.pdf` extension, ignoring case.
pub fn is_pdf_name(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(PDF_EXTENSION))
        .unwrap_or(false)
}
