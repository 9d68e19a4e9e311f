/*!
Errors raised while loading data and orchestrating trials
*/
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single worker did not produce a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The trainer returned an error
    Error(String),
    /// The worker thread panicked
    Panicked(String),
    /// The worker was still running when the deadline passed
    TimedOut,
    /// The worker finished but its metrics could not be written
    Persist(String),
    /// The worker finished but its metrics were not found where they were persisted
    ResultMissing(PathBuf),
}

/// A worker which did not produce a result, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    /// The index of the failed worker
    pub worker: usize,
    /// What went wrong
    pub kind: FailureKind,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            FailureKind::Error(msg) => write!(f, "worker {} failed: {}", self.worker, msg),
            FailureKind::Panicked(msg) => write!(f, "worker {} panicked: {}", self.worker, msg),
            FailureKind::TimedOut => write!(f, "worker {} timed out", self.worker),
            FailureKind::Persist(msg) => {
                write!(f, "worker {} could not persist metrics: {}", self.worker, msg)
            }
            FailureKind::ResultMissing(path) => write!(
                f,
                "worker {} metrics missing at {}",
                self.worker,
                path.display()
            ),
        }
    }
}

/// The error type for `stocktrials`
#[derive(Debug, Error)]
pub enum TrialError {
    /// A configuration value was out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading or writing a file failed
    #[error("IO error at {}: {}", .path.display(), .source)]
    Io {
        /// The path being accessed
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// A CSV table could not be read or written
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A JSON document could not be written
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A price history did not have a required column
    #[error("Price history has no {0} column")]
    MissingColumn(String),

    /// A price history was not in strictly increasing chronological order
    #[error("Price history is out of order at row {index}")]
    UnorderedSeries {
        /// The first row which does not come after its predecessor
        index: usize,
    },

    /// A worker's metrics table was not found where it should have been persisted
    #[error("Metrics for worker {} missing at {}", .worker, .path.display())]
    WorkerResultMissing {
        /// The worker index
        worker: usize,
        /// Where the metrics were expected
        path: PathBuf,
    },

    /// One or more workers failed
    #[error("{} worker(s) failed: {}", .0.len(), join_failures(.0))]
    WorkersFailed(Vec<WorkerFailure>),

    /// Workers reported metric tables of different lengths
    #[error("Metric tables differ in length: shortest has {shortest} epochs, longest has {longest}")]
    LengthMismatch {
        /// The length of the shortest table
        shortest: usize,
        /// The length of the longest table
        longest: usize,
    },

    /// No worker produced any metrics to aggregate
    #[error("No worker produced any results")]
    NoResults,
}

impl TrialError {
    /// Wrap an IO error with the path it occured at
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> TrialError {
        TrialError::Io {
            path: path.into(),
            source,
        }
    }
}

fn join_failures(failures: &[WorkerFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
