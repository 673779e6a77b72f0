use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Remote operation that produced a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportOp {
    Connect,
    List,
    Download,
    Upload,
    Delete,
    Move,
}

impl fmt::Display for TransportOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportOp::Connect => "connect",
            TransportOp::List => "list",
            TransportOp::Download => "download",
            TransportOp::Upload => "upload",
            TransportOp::Delete => "delete",
            TransportOp::Move => "move",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    NotFound,
    QuotaExceeded,
    Transient,
    AuthExpired,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::NotFound => "not found",
            TransportErrorKind::QuotaExceeded => "quota exceeded",
            TransportErrorKind::Transient => "transient network failure",
            TransportErrorKind::AuthExpired => "authentication expired",
            TransportErrorKind::Other => "transport failure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{op} {path}: {kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub op: TransportOp,
    pub path: String,
    pub message: String,
}

impl TransportError {
    pub fn new(
        kind: TransportErrorKind,
        op: TransportOp,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            op,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn not_found(op: TransportOp, path: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, op, path, "no such object")
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == TransportErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == TransportErrorKind::NotFound
    }
}

/// Failure of a single compression backend. Never fatal to the run.
#[derive(Debug, Clone, Error)]
pub enum StrategyError {
    #[error("{strategy} is not available on this system")]
    Unavailable { strategy: String },

    #[error("{strategy} failed: {message}")]
    Failed { strategy: String, message: String },

    #[error("{strategy} exceeded its {seconds}s time limit")]
    TimedOut { strategy: String, seconds: u64 },
}

/// Why a compressed candidate was discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationFailure {
    #[error("output is missing or empty")]
    Missing,

    #[error("cannot open PDF: {0}")]
    Unreadable(String),

    #[error("page count changed from {expected} to {actual}")]
    PageCountMismatch { expected: usize, actual: usize },

    #[error("output ({compressed} bytes) is not smaller than the original ({original} bytes)")]
    NotSmaller { original: u64, compressed: u64 },

    #[error("saved {percent:.1}%, below the required {required:.1}%")]
    InsufficientSaving { percent: f64, required: f64 },
}

/// Per-file failure. Always converted into a `FileOutcome` by the replacer.
#[derive(Debug, Clone, Error)]
pub enum ReplaceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("verification failed: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("local I/O error: {0}")]
    Io(String),

    #[error("uploaded {path} reports {actual} bytes, expected {expected}")]
    UploadMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("safety violation: {0}")]
    SafetyViolation(String),

    #[error("processing aborted: {0}")]
    Aborted(String),
}

impl From<std::io::Error> for ReplaceError {
    fn from(err: std::io::Error) -> Self {
        ReplaceError::Io(err.to_string())
    }
}

/// Run-level and command-level errors.
#[derive(Debug, Error)]
pub enum SqueezeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("Unknown compression level: {0}. Expected low, medium or high")]
    UnknownLevel(String),

    #[error("Unknown compression strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid skip pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Cannot open storage session: {0}")]
    Session(String),

    #[error("Cannot list remote folder: {0}")]
    Listing(TransportError),

    #[error("PDF inspection failed: {0}")]
    Inspection(#[from] ValidationFailure),

    #[error("Statistics serialization error: {0}")]
    Stats(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, SqueezeError>;
