//! Picks the first backend whose output is a valid, sufficiently smaller PDF.

use crate::config::Profile;
use crate::error::{StrategyError, ValidationFailure};
use crate::pdf::{self, PdfInfo};
use crate::strategies::StrategySet;
use crate::utils::{format_file_size, meets_saving_threshold, percent_saved};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Accepted compression of one file. Only built from a verified candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionResult {
    pub winning_strategy: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub percent_saved: f64,
}

impl CompressionResult {
    fn new(strategy: &str, original_size: u64, compressed_size: u64) -> Self {
        Self {
            winning_strategy: strategy.to_string(),
            original_size,
            compressed_size,
            percent_saved: percent_saved(original_size, compressed_size),
        }
    }

    pub fn bytes_saved(&self) -> u64 {
        self.original_size.saturating_sub(self.compressed_size)
    }
}

#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success { local_path: PathBuf, size_bytes: u64 },
    Rejected { reason: ValidationFailure },
    Failed { error: StrategyError },
}

#[derive(Debug, Clone)]
pub struct CompressionAttempt {
    pub strategy: String,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for CompressionAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Success { size_bytes, .. } => {
                write!(f, "{}: accepted ({})", self.strategy, format_file_size(*size_bytes))
            }
            AttemptOutcome::Rejected { reason } => write!(f, "{}: rejected, {}", self.strategy, reason),
            AttemptOutcome::Failed { error } => write!(f, "{}: {}", self.strategy, error),
        }
    }
}

#[derive(Debug)]
pub enum Selection {
    Accepted {
        result: CompressionResult,
        artifact: PathBuf,
        attempts: Vec<CompressionAttempt>,
    },
    NoAcceptableResult {
        attempts: Vec<CompressionAttempt>,
    },
}

impl Selection {
    pub fn attempts(&self) -> &[CompressionAttempt] {
        match self {
            Selection::Accepted { attempts, .. } | Selection::NoAcceptableResult { attempts } => attempts,
        }
    }
}

/// Structure first, then ratio.
pub fn check_candidate(
    original: &PdfInfo,
    candidate: &PdfInfo,
    min_percent: f64,
) -> Result<(), ValidationFailure> {
    if candidate.pages != original.pages {
        return Err(ValidationFailure::PageCountMismatch {
            expected: original.pages,
            actual: candidate.pages,
        });
    }
    if candidate.size_bytes >= original.size_bytes {
        return Err(ValidationFailure::NotSmaller {
            original: original.size_bytes,
            compressed: candidate.size_bytes,
        });
    }
    if !meets_saving_threshold(original.size_bytes, candidate.size_bytes, min_percent) {
        return Err(ValidationFailure::InsufficientSaving {
            percent: percent_saved(original.size_bytes, candidate.size_bytes),
            required: min_percent,
        });
    }
    Ok(())
}

/// Inspects `candidate` and checks it against the original.
pub async fn verify_candidate(
    original: &PdfInfo,
    candidate: &Path,
    min_percent: f64,
) -> Result<PdfInfo, ValidationFailure> {
    let info = pdf::inspect(candidate).await?;
    check_candidate(original, &info, min_percent)?;
    Ok(info)
}

#[derive(Clone)]
pub struct CompressionSelector {
    strategies: StrategySet,
    min_percent: f64,
}

impl CompressionSelector {
    pub fn new(strategies: StrategySet, min_percent: f64) -> Self {
        Self {
            strategies,
            min_percent,
        }
    }

    pub fn min_percent(&self) -> f64 {
        self.min_percent
    }

    /// Tries backends in priority order and stops at the first acceptable
    /// output. Rejected outputs are deleted from `scratch`.
    pub async fn select(&self, input: &Path, scratch: &Path, profile: &Profile) -> Selection {
        let mut attempts = Vec::new();

        let original = match pdf::inspect(input).await {
            Ok(info) => info,
            Err(reason) => {
                attempts.push(CompressionAttempt {
                    strategy: "input".to_string(),
                    outcome: AttemptOutcome::Rejected { reason },
                });
                return Selection::NoAcceptableResult { attempts };
            }
        };

        for strategy in self.strategies.order_for(&original) {
            let name = strategy.name().to_string();

            if !strategy.available().await {
                debug!("Skipping {}: not available", name);
                attempts.push(CompressionAttempt {
                    strategy: name.clone(),
                    outcome: AttemptOutcome::Failed {
                        error: StrategyError::Unavailable { strategy: name },
                    },
                });
                continue;
            }

            let output = scratch.join(format!("candidate-{}.pdf", name));
            debug!("Trying {} on {}", name, input.display());

            if let Err(error) = strategy.compress(input, &output, profile).await {
                debug!("{}", error);
                attempts.push(CompressionAttempt {
                    strategy: name,
                    outcome: AttemptOutcome::Failed { error },
                });
                continue;
            }

            match verify_candidate(&original, &output, self.min_percent).await {
                Ok(candidate) => {
                    let result = CompressionResult::new(&name, original.size_bytes, candidate.size_bytes);
                    info!(
                        "✅ {} saved {:.1}% ({} -> {})",
                        name,
                        result.percent_saved,
                        format_file_size(result.original_size),
                        format_file_size(result.compressed_size)
                    );
                    attempts.push(CompressionAttempt {
                        strategy: name,
                        outcome: AttemptOutcome::Success {
                            local_path: output.clone(),
                            size_bytes: candidate.size_bytes,
                        },
                    });
                    return Selection::Accepted {
                        result,
                        artifact: output,
                        attempts,
                    };
                }
                Err(reason) => {
                    debug!("{} output rejected: {}", name, reason);
                    let _ = tokio::fs::remove_file(&output).await;
                    attempts.push(CompressionAttempt {
                        strategy: name,
                        outcome: AttemptOutcome::Rejected { reason },
                    });
                }
            }
        }

        Selection::NoAcceptableResult { attempts }
    }
}
