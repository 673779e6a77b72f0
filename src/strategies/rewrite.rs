use super::{discard_output, CompressionStrategy};
use crate::config::Profile;
use crate::constants::STRATEGY_LOPDF;
use crate::error::StrategyError;
use async_trait::async_trait;
use lopdf::Document;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// In-process rewrite: drops unreferenced objects and empty streams, then
/// flate-compresses every stream that allows it.
pub struct LopdfStrategy {
    timeout: Duration,
}

impl LopdfStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn failed(message: impl Into<String>) -> StrategyError {
        StrategyError::Failed {
            strategy: STRATEGY_LOPDF.to_string(),
            message: message.into(),
        }
    }

    /// Rewrites the document and returns the new bytes. Nothing is written to
    /// disk here, so an abandoned run cannot leave output behind.
    pub fn rewrite(input: &Path) -> Result<Vec<u8>, StrategyError> {
        let mut doc = Document::load(input).map_err(|e| Self::failed(format!("cannot parse: {}", e)))?;
        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(Self::failed("encrypted documents are left untouched"));
        }

        let pruned = doc.prune_objects();
        let empty = doc.delete_zero_length_streams();
        debug!(
            "lopdf pruned {} unreferenced objects and {} empty streams",
            pruned.len(),
            empty.len()
        );
        doc.renumber_objects();
        doc.compress();

        let mut buffer = Cursor::new(Vec::new());
        doc.save_to(&mut buffer)
            .map_err(|e| Self::failed(format!("cannot save: {}", e)))?;
        Ok(buffer.into_inner())
    }
}

#[async_trait]
impl CompressionStrategy for LopdfStrategy {
    fn name(&self) -> &str {
        STRATEGY_LOPDF
    }

    fn preserves_structure(&self) -> bool {
        true
    }

    async fn available(&self) -> bool {
        true
    }

    async fn compress(&self, input: &Path, output: &Path, _profile: &Profile) -> Result<(), StrategyError> {
        let source: PathBuf = input.to_path_buf();
        let task = tokio::task::spawn_blocking(move || Self::rewrite(&source));

        let bytes = tokio::time::timeout(self.timeout, task)
            .await
            .map_err(|_| StrategyError::TimedOut {
                strategy: STRATEGY_LOPDF.to_string(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| Self::failed(format!("worker panicked: {}", e)))??;

        if let Err(e) = tokio::fs::write(output, &bytes).await {
            discard_output(output).await;
            return Err(Self::failed(format!("cannot write output: {}", e)));
        }
        Ok(())
    }
}
