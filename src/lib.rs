pub mod cli;
pub mod config;
pub mod constants;
pub mod control;
pub mod eligibility;
pub mod error;
pub mod logger;
pub mod path_matcher;
pub mod pdf;
pub mod pipeline;
pub mod replacer;
pub mod selector;
pub mod stats;
pub mod storage;
pub mod strategies;
pub mod utils;
pub mod workspace;

pub use config::{CompressionLevel, Profile, Settings};
pub use control::RunControl;
pub use eligibility::{EligibilityFilter, IneligibleReason};
pub use error::{ReplaceError, Result, SqueezeError, StrategyError, TransportError, ValidationFailure};
pub use path_matcher::{belongs_to, normalize_path, LogicalFolder};
pub use pipeline::{CandidateSet, Pipeline, RunRequest};
pub use replacer::{FileOutcome, FileReport, SafeReplacer};
pub use selector::{CompressionResult, CompressionSelector, Selection};
pub use stats::{RunStats, RunStatsAggregator};
pub use storage::{LocalStorage, MemoryStorage, RcloneStorage, RemoteEntry, RemoteStorage};
pub use strategies::{CompressionStrategy, StrategySet};
