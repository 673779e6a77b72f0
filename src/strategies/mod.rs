//! Compression backends.
//!
//! Each backend turns `input` into `output` using one [`Profile`]. Backends
//! never touch the input, always leave either a complete output or none, and
//! report problems as [`StrategyError`] instead of failing the run.

mod ghostscript;
mod rewrite;
mod qpdf;

pub use self::ghostscript::GhostscriptStrategy;
pub use self::rewrite::LopdfStrategy;
pub use self::qpdf::QpdfStrategy;

use crate::config::{CompressionSettings, Profile};
use crate::constants::{PROBE_TIMEOUT_SECS, STRATEGY_GHOSTSCRIPT, STRATEGY_LOPDF, STRATEGY_QPDF};
use crate::error::{Result, SqueezeError, StrategyError};
use crate::pdf::PdfInfo;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait CompressionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the backend rewrites structure without re-rendering content.
    fn preserves_structure(&self) -> bool;

    /// Whether the backend can run here. Probed once and cached.
    async fn available(&self) -> bool;

    async fn compress(&self, input: &Path, output: &Path, profile: &Profile) -> std::result::Result<(), StrategyError>;
}

/// The configured backends and the two priority orders over them.
#[derive(Clone)]
pub struct StrategySet {
    default_order: Vec<Arc<dyn CompressionStrategy>>,
    structure_first: Vec<Arc<dyn CompressionStrategy>>,
}

impl StrategySet {
    pub fn new(
        default_order: Vec<Arc<dyn CompressionStrategy>>,
        structure_first: Vec<Arc<dyn CompressionStrategy>>,
    ) -> Self {
        Self {
            default_order,
            structure_first,
        }
    }

    /// One order for every document.
    pub fn single(order: Vec<Arc<dyn CompressionStrategy>>) -> Self {
        Self::new(order.clone(), order)
    }

    pub fn from_settings(settings: &CompressionSettings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.backend_timeout_secs);
        let ghostscript: Arc<dyn CompressionStrategy> =
            Arc::new(GhostscriptStrategy::new(&settings.ghostscript_bin, timeout));
        let qpdf: Arc<dyn CompressionStrategy> = Arc::new(QpdfStrategy::new(&settings.qpdf_bin, timeout));
        let lopdf: Arc<dyn CompressionStrategy> = Arc::new(LopdfStrategy::new(timeout));

        let resolve = |names: &[String]| -> Result<Vec<Arc<dyn CompressionStrategy>>> {
            names
                .iter()
                .map(|name| match strategy_key(name).as_str() {
                    STRATEGY_GHOSTSCRIPT => Ok(Arc::clone(&ghostscript)),
                    STRATEGY_QPDF => Ok(Arc::clone(&qpdf)),
                    STRATEGY_LOPDF => Ok(Arc::clone(&lopdf)),
                    _ => Err(SqueezeError::UnknownStrategy(name.clone())),
                })
                .collect()
        };

        let default_order = resolve(&settings.strategy_order)?;
        let structure_first = if settings.structure_first_order.is_empty() {
            default_order.clone()
        } else {
            resolve(&settings.structure_first_order)?
        };
        Ok(Self::new(default_order, structure_first))
    }

    /// Priority order for a document.
    pub fn order_for(&self, info: &PdfInfo) -> &[Arc<dyn CompressionStrategy>] {
        if info.prefers_structure_preserving() {
            &self.structure_first
        } else {
            &self.default_order
        }
    }

    /// Complains when documents with forms or annotations would first go to a
    /// backend that re-renders content.
    pub fn structure_first_warning(&self) -> Option<String> {
        let first = self.structure_first.first()?;
        if first.preserves_structure() {
            return None;
        }
        Some(format!(
            "structure_first_order starts with {}, which re-renders content; forms and annotations may be flattened",
            first.name()
        ))
    }

    /// Every distinct backend, in default order first.
    pub fn all(&self) -> Vec<Arc<dyn CompressionStrategy>> {
        let mut seen: Vec<Arc<dyn CompressionStrategy>> = Vec::new();
        for strategy in self.default_order.iter().chain(self.structure_first.iter()) {
            if !seen.iter().any(|s| s.name() == strategy.name()) {
                seen.push(Arc::clone(strategy));
            }
        }
        seen
    }
}

/// Configured backend names are matched ignoring case and surrounding blanks.
pub fn strategy_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Runs `binary args...` and reports whether it exited successfully in time.
pub(crate) async fn probe(binary: &str, args: &[&str]) -> bool {
    let child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    let Ok(child) = child else {
        debug!("{} not found", binary);
        return false;
    };
    matches!(
        tokio::time::timeout(Duration::from_secs(PROBE_TIMEOUT_SECS), child.wait_with_output()).await,
        Ok(Ok(output)) if output.status.success()
    )
}

/// Runs an external backend, accepting the listed exit codes, and removes the
/// output file on any failure.
pub(crate) async fn run_tool(
    strategy: &str,
    binary: &str,
    args: &[String],
    output: &Path,
    timeout: Duration,
    accepted_codes: &[i32],
) -> std::result::Result<(), StrategyError> {
    debug!("Running: {} {}", binary, args.join(" "));
    let result = run_tool_inner(strategy, binary, args, timeout, accepted_codes).await;
    let result = result.and_then(|_| {
        match std::fs::metadata(output) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(StrategyError::Failed {
                strategy: strategy.to_string(),
                message: "no output produced".to_string(),
            }),
        }
    });
    if result.is_err() {
        discard_output(output).await;
    }
    result
}

async fn run_tool_inner(
    strategy: &str,
    binary: &str,
    args: &[String],
    timeout: Duration,
    accepted_codes: &[i32],
) -> std::result::Result<(), StrategyError> {
    let failed = |message: String| StrategyError::Failed {
        strategy: strategy.to_string(),
        message,
    };

    let child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StrategyError::Unavailable {
                strategy: strategy.to_string(),
            },
            _ => failed(e.to_string()),
        })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| StrategyError::TimedOut {
            strategy: strategy.to_string(),
            seconds: timeout.as_secs(),
        })?
        .map_err(|e| failed(e.to_string()))?;

    let code = output.status.code();
    if output.status.success() || code.map_or(false, |c| accepted_codes.contains(&c)) {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
    Err(failed(match code {
        Some(c) => format!("exit code {}: {}", c, tail),
        None => format!("terminated by signal: {}", tail),
    }))
}

pub(crate) async fn discard_output(output: &Path) {
    if tokio::fs::try_exists(output).await.unwrap_or(false) {
        let _ = tokio::fs::remove_file(output).await;
    }
}
