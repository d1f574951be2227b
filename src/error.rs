//! Error types for the loss-accounting engine.
//!
//! The taxonomy separates conditions that are fatal for a single run (the
//! batch continues) from conditions that are fatal for the whole invocation,
//! and keeps enough context (run number, lumiblock, defect/veto name) to
//! reproduce every recovered condition from the logs.

use std::path::PathBuf;

/// Result type for loss-accounting operations.
pub type LossResult<T> = Result<T, LossError>;

/// Error type for loss-accounting operations.
#[derive(Debug, thiserror::Error)]
pub enum LossError {
    /// The conditions/metadata provider failed for a run.
    #[error("provider error for run {run}: {message}")]
    Provider { run: u32, message: String },

    /// A defect interval ends far beyond the run's lumiblock count. This is
    /// a corruption signal in the source database: the whole run is excluded
    /// from the batch, never partially processed.
    #[error(
        "run {run} has a corrupted defect interval: {defect} ends at lumiblock \
         {until_lb} while the run only has {n_lb} lumiblocks"
    )]
    CorruptedInterval {
        run: u32,
        defect: String,
        until_lb: u32,
        n_lb: u32,
    },

    /// Another invocation holds the single-writer marker for this
    /// (system, year, tag). The job must refuse to start, not queue.
    #[error("a concurrent update holds the lock marker {marker} - refusing to run")]
    ConcurrencyConflict { marker: PathBuf },

    /// The persisted archive could not be read or written.
    #[error("archive error at {path}: {message}")]
    Archive { path: PathBuf, message: String },

    /// Classification tables or year/tag properties are unusable.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A requested run is absent from the authoritative run list. This is a
    /// user-input error: the run must be added to the list first.
    #[error(
        "run range {first}-{last} selects no run from {run_list}; \
         add the run(s) to the run list before processing them"
    )]
    RunNotListed {
        first: u32,
        last: u32,
        run_list: PathBuf,
    },

    /// The run list file itself is missing.
    #[error("run list {path} does not exist; create it or choose a different tag")]
    MissingRunList { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LossError {
    /// Create a provider error for a run.
    pub fn provider(run: u32, message: impl Into<String>) -> Self {
        Self::Provider {
            run,
            message: message.into(),
        }
    }

    /// Create an archive error with the offending path.
    pub fn archive(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True when the error invalidates only the current run, not the batch.
    pub fn is_fatal_for_run_only(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::CorruptedInterval { .. }
        )
    }
}
