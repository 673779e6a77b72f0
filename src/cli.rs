use crate::config::{CompressionLevel, Settings};
use crate::error::Result;
use crate::path_matcher::LogicalFolder;
use crate::pipeline::RunRequest;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pdf-squeeze",
    about = "Batch PDF compression for remote folders",
    long_about = "pdf-squeeze lists a remote folder, compresses every eligible PDF with the first \
                  backend that produces a valid and sufficiently smaller file, and replaces the \
                  original only after the compressed copy is safely uploaded.",
    version,
    after_help = "EXAMPLES:\n  \
    pdf-squeeze run --level high --max-files 20\n  \
    pdf-squeeze run --dry-run --stats-json stats.json\n  \
    pdf-squeeze scan --source /pdf/Inbox\n  \
    pdf-squeeze compress report.pdf report-small.pdf -l low\n  \
    pdf-squeeze info report.pdf\n  \
    pdf-squeeze doctor"
)]
pub struct Args {
    #[arg(
        short = 'c',
        long,
        global = true,
        env = "PDF_SQUEEZE_CONFIG",
        help = "Configuration file (default: config/settings.toml)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'v',
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase log verbosity (-v debug, -vv trace)"
    )]
    pub verbose: u8,

    #[arg(short = 'q', long, global = true, help = "Only print errors")]
    pub quiet: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines on stderr")]
    pub json_logs: bool,

    #[arg(long, global = true, help = "Also append logs to this file")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Per-run overrides of the configuration file.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct RunOverrides {
    #[arg(short = 's', long, help = "Remote input folder")]
    pub source: Option<String>,

    #[arg(
        short = 't',
        long,
        help = "Remote output folder",
        long_help = "Remote folder for compressed files. When it equals the input folder and no \
                     output suffix is configured, originals are replaced in place and backups are required."
    )]
    pub target: Option<String>,

    #[arg(short = 'l', long, help = "Compression level (low, medium, high)")]
    pub level: Option<String>,

    #[arg(short = 'n', long, help = "Maximum number of files to process")]
    pub max_files: Option<usize>,

    #[arg(long, help = "Run time limit in seconds")]
    pub timeout: Option<u64>,

    #[arg(
        short = 'j',
        long,
        help = "Number of files processed concurrently",
        long_help = "Number of files in flight at once. Each one holds up to three local copies \
                     in the scratch directory."
    )]
    pub workers: Option<usize>,
}

impl RunOverrides {
    /// Writes folder and limit overrides into `settings`.
    pub fn apply(&self, settings: &mut Settings) -> Result<()> {
        if let Some(source) = &self.source {
            settings.folders.input = LogicalFolder::new(source.as_str());
        }
        if let Some(target) = &self.target {
            settings.folders.output = LogicalFolder::new(target.as_str());
        }
        if let Some(level) = &self.level {
            settings.compression.default_level = level.parse::<CompressionLevel>()?;
        }
        if let Some(max_files) = self.max_files {
            settings.limits.max_files_per_run = max_files;
        }
        if let Some(timeout) = self.timeout {
            settings.limits.run_timeout_secs = timeout;
        }
        if let Some(workers) = self.workers {
            settings.limits.workers = workers;
        }
        Ok(())
    }

    /// The run request for settings that already carry these overrides.
    pub fn request(settings: &Settings, dry_run: bool) -> RunRequest {
        RunRequest {
            dry_run,
            ..RunRequest::from_settings(settings)
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(
        about = "Compress eligible PDFs in the remote input folder",
        long_about = "List the input folder once, pick the smallest eligible PDFs up to the file cap, \
                      and compress them with bounded concurrency. Every replacement is verified, \
                      backed up and uploaded before the original is removed."
    )]
    Run {
        #[command(flatten)]
        overrides: RunOverrides,

        #[arg(
            short = 'd',
            long,
            help = "Compress and verify without changing the remote",
            long_help = "Download and compress every candidate, then stop before the backup. \
                         Reports the savings a real run would achieve."
        )]
        dry_run: bool,

        #[arg(long, help = "Write run statistics to this JSON file")]
        stats_json: Option<PathBuf>,
    },

    #[command(about = "Show which files the next run would process")]
    Scan {
        #[command(flatten)]
        overrides: RunOverrides,
    },

    #[command(
        about = "Compress a single local PDF",
        long_about = "Run one local file through the configured backends and keep the first \
                      result that passes verification and the savings threshold."
    )]
    Compress {
        #[arg(help = "Input PDF file path")]
        input: PathBuf,

        #[arg(help = "Output PDF file path")]
        output: PathBuf,

        #[arg(short = 'l', long, help = "Compression level (low, medium, high)")]
        level: Option<String>,
    },

    #[command(about = "Display PDF structure and size information")]
    Info {
        #[arg(help = "PDF file path to analyze")]
        input: PathBuf,
    },

    #[command(
        about = "Check configuration and backend availability",
        long_about = "Validate the configuration file, probe Ghostscript and qpdf, and open a \
                      storage session without transferring any file."
    )]
    Doctor,
}
