use super::{probe, run_tool, CompressionStrategy};
use crate::config::Profile;
use crate::constants::STRATEGY_GHOSTSCRIPT;
use crate::error::StrategyError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Re-renders the document through Ghostscript's `pdfwrite` device.
pub struct GhostscriptStrategy {
    binary: String,
    timeout: Duration,
    available: OnceCell<bool>,
}

impl GhostscriptStrategy {
    pub fn new(binary: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            timeout,
            available: OnceCell::new(),
        }
    }

    pub fn build_args(input: &Path, output: &Path, profile: &Profile) -> Vec<String> {
        let mut args = vec![
            "-sDEVICE=pdfwrite".to_string(),
            "-dCompatibilityLevel=1.4".to_string(),
            format!("-dPDFSETTINGS=/{}", profile.ghostscript_preset),
            "-dNOPAUSE".to_string(),
            "-dQUIET".to_string(),
            "-dBATCH".to_string(),
            "-dSAFER".to_string(),
        ];

        if profile.downsample_images {
            let resolution = profile.image_resolution;
            for kind in ["Color", "Gray", "Mono"] {
                args.push(format!("-dDownsample{}Images=true", kind));
                args.push(format!("-d{}ImageResolution={}", kind, resolution));
                args.push(format!("-d{}ImageDownsampleType=/Bicubic", kind));
            }
            args.push("-dColorImageDownsampleThreshold=1.0".to_string());
            args.push("-dGrayImageDownsampleThreshold=1.0".to_string());
            args.push(format!("-dJPEGQ={}", profile.image_quality));
            args.push("-dOptimize=true".to_string());
            args.push("-dEmbedAllFonts=true".to_string());
        }

        args.push(format!("-sOutputFile={}", output.display()));
        args.push(input.display().to_string());
        args
    }
}

#[async_trait]
impl CompressionStrategy for GhostscriptStrategy {
    fn name(&self) -> &str {
        STRATEGY_GHOSTSCRIPT
    }

    fn preserves_structure(&self) -> bool {
        false
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
        run_tool(self.name(), &self.binary, &args, output, self.timeout, &[]).await
    }
}
