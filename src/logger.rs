use crate::error::{Result, SqueezeError};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static QUIET_MODE: AtomicBool = AtomicBool::new(false);

pub fn set_quiet_mode(quiet: bool) {
    QUIET_MODE.store(quiet, Ordering::Relaxed);
}

/// Progress bars and summaries stay hidden in quiet mode.
pub fn is_quiet() -> bool {
    QUIET_MODE.load(Ordering::Relaxed)
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbosity: u8,
    pub quiet: bool,
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl LogOptions {
    /// Level used when `RUST_LOG` is unset.
    pub fn default_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global subscriber: console on stderr, plain or JSON, plus an
/// optional append-only log file without ANSI colors.
pub fn init_logging(options: &LogOptions) -> Result<()> {
    set_quiet_mode(options.quiet);

    let file_layer = match &options.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let plain = (!options.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });
    let json = options.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
    });

    tracing_subscriber::registry()
        .with(build_env_filter(options.default_level()))
        .with(plain)
        .with(json)
        .with(file_layer)
        .try_init()
        .map_err(|err| SqueezeError::Logging(err.to_string()))
}
