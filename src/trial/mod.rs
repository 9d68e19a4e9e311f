/*!
Independent training trials over a shared dataset.

Every worker gets its own copy of the training and validation windows and trains a fresh model on them
through a [`Trainer`]. The [`Orchestrator`] runs the workers in parallel, waits for all of them, and
averages the metrics they persisted.
*/
use crate::config::TrialConfig;
use crate::data::scale::MinMaxScaler;
use crate::data::window::{window_count, Dataset};
use crate::metrics::MetricsTable;
use crate::util::fraction_of;
use crate::CpuFloat;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod orchestrator;

pub use orchestrator::{Orchestrator, TrialReport, WorkerOutcome};

/// The windows a worker trains and validates on
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingData<F = CpuFloat> {
    /// The training prefix
    pub train: Dataset<F>,
    /// The validation suffix
    pub validation: Dataset<F>,
}

impl TrainingData {
    /// Window a series and split it into training and validation sets, without scaling
    pub fn from_series(series: &[CpuFloat], config: &TrialConfig) -> TrainingData {
        let (train, validation) =
            Dataset::from_series(series, config.window_len).split(config.split_fraction);
        TrainingData { train, validation }
    }
    /// Scale a series, window it and split it into training and validation sets.
    ///
    /// The scaler is fitted only on the part of the series the training windows see, so no
    /// information leaks from the validation period. Returns the scaler so predictions can be unscaled.
    pub fn prepare(series: &[CpuFloat], config: &TrialConfig) -> (TrainingData, MinMaxScaler) {
        let windows = window_count(series.len(), config.window_len);
        let train_windows = fraction_of(windows, config.split_fraction);
        let seen = if train_windows == 0 {
            0
        } else {
            (train_windows + config.window_len).min(series.len())
        };
        let scaler = MinMaxScaler::fit(&series[..seen]).unwrap_or(MinMaxScaler { min: 0.0, max: 1.0 });
        let scaled = scaler.transform(series);
        (TrainingData::from_series(&scaled, config), scaler)
    }
}

impl<F> TrainingData<F> {
    /// The total number of windows
    pub fn len(&self) -> usize
    where
        F: Copy,
    {
        self.train.len() + self.validation.len()
    }
}

/// What a worker knows about itself
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// This worker's index
    pub worker: usize,
    /// This worker's random seed
    pub seed: u64,
    /// The run configuration
    pub config: Arc<TrialConfig>,
    cancel: Arc<AtomicBool>,
}

impl WorkerContext {
    /// A context for a worker outside of an orchestrated run
    pub fn new(worker: usize, config: Arc<TrialConfig>) -> WorkerContext {
        Self::with_cancel(worker, config, Arc::new(AtomicBool::new(false)))
    }
    fn with_cancel(worker: usize, config: Arc<TrialConfig>, cancel: Arc<AtomicBool>) -> WorkerContext {
        WorkerContext {
            worker,
            seed: config.worker_seed(worker),
            config,
            cancel,
        }
    }
    /// Whether the orchestrator has stopped waiting for this worker. Trainers should check this between epochs
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Trains one model on a private copy of the data, reporting metrics for every completed epoch
pub trait Trainer: Send + Sync {
    /// Train a model and return its metrics
    fn train(&self, ctx: &WorkerContext, data: TrainingData) -> anyhow::Result<MetricsTable>;
}

impl<T> Trainer for T
where
    T: Fn(&WorkerContext, TrainingData) -> anyhow::Result<MetricsTable> + Send + Sync,
{
    fn train(&self, ctx: &WorkerContext, data: TrainingData) -> anyhow::Result<MetricsTable> {
        self(ctx, data)
    }
}
