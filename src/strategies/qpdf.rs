use super::{probe, run_tool, CompressionStrategy};
use crate::config::Profile;
use crate::constants::{QPDF_EXIT_WARNINGS, STRATEGY_QPDF};
use crate::error::StrategyError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Recompresses streams with qpdf, leaving content and structure alone.
pub struct QpdfStrategy {
    binary: String,
    timeout: Duration,
    available: OnceCell<bool>,
}

impl QpdfStrategy {
    pub fn new(binary: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            timeout,
            available: OnceCell::new(),
        }
    }

    pub fn build_args(input: &Path, output: &Path, profile: &Profile) -> Vec<String> {
        let mut args = vec![
            "--compress-streams=y".to_string(),
            "--recompress-flate".to_string(),
            format!("--compression-level={}", profile.qpdf_compression_level.min(9)),
        ];
        if profile.object_streams {
            args.push("--object-streams=generate".to_string());
        }
        args.push(input.display().to_string());
        args.push(output.display().to_string());
        args
    }
}

#[async_trait]
impl CompressionStrategy for QpdfStrategy {
    fn name(&self) -> &str {
        STRATEGY_QPDF
    }

    fn preserves_structure(&self) -> bool {
        true
    }

    async fn available(&self) -> bool {
        *self
            .available
            .get_or_init(|| probe(&self.binary, &["--version"]))
            .await
    }

    async fn compress(&self, input: &Path, output: &Path, profile: &Profile) -> Result<(), StrategyError> {
        if !self.available().await {
            return Err(StrategyError::Unavailable {
                strategy: self.name().to_string(),
            });
        }
        let args = Self::build_args(input, output, profile);
        run_tool(
            self.name(),
            &self.binary,
            &args,
            output,
            self.timeout,
            &[QPDF_EXIT_WARNINGS],
        )
        .await
    }
}
