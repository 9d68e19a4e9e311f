use super::{Trainer, TrainingData, WorkerContext};
use crate::config::{FailurePolicy, TrialConfig};
use crate::error::{FailureKind, TrialError, WorkerFailure};
use crate::metrics::{aggregate, load_worker_table, save_table, MetricsTable};
use std::any::Any;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, info_span, warn};

/// How a worker ended
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// The worker trained and persisted its metrics
    Finished {
        /// The number of epochs completed
        epochs: usize,
        /// Where the metrics were persisted
        path: PathBuf,
    },
    /// The worker did not produce a result
    Failed(FailureKind),
}

/// The result of a run of trials
#[derive(Debug, Clone, PartialEq)]
pub struct TrialReport {
    /// The per-epoch mean of the metrics of every worker which contributed
    pub mean: MetricsTable,
    /// The metrics of every worker which contributed, by worker index
    pub tables: BTreeMap<usize, MetricsTable>,
    /// The workers which did not contribute
    pub failures: Vec<WorkerFailure>,
}

/// Runs a set of independent training workers and aggregates their metrics
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Arc<TrialConfig>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Train, then persist the metrics under the worker's path
fn run_worker<T: Trainer + ?Sized>(
    trainer: &T,
    ctx: &WorkerContext,
    data: TrainingData,
) -> WorkerOutcome {
    let path = ctx.config.trial_path(ctx.worker);
    let trained = panic::catch_unwind(AssertUnwindSafe(|| trainer.train(ctx, data)));
    let table = match trained {
        Ok(Ok(table)) => table,
        Ok(Err(err)) => return WorkerOutcome::Failed(FailureKind::Error(format!("{:#}", err))),
        Err(payload) => return WorkerOutcome::Failed(FailureKind::Panicked(panic_message(payload))),
    };
    // Already reported as timed out, so nothing may be persisted
    if ctx.is_cancelled() {
        return WorkerOutcome::Failed(FailureKind::TimedOut);
    }
    match save_table(&path, &table) {
        Ok(()) => WorkerOutcome::Finished {
            epochs: table.len(),
            path,
        },
        Err(err) => WorkerOutcome::Failed(FailureKind::Persist(err.to_string())),
    }
}

/// Record a worker's report and pass it on to the progress callback
fn record<C: FnMut(usize, &WorkerOutcome)>(
    outcomes: &mut BTreeMap<usize, WorkerOutcome>,
    on_finished: &mut C,
    worker: usize,
    outcome: WorkerOutcome,
) {
    match &outcome {
        WorkerOutcome::Finished { epochs, .. } => info!(worker, epochs, "Worker finished"),
        WorkerOutcome::Failed(kind) => warn!(worker, ?kind, "Worker failed"),
    }
    on_finished(worker, &outcome);
    outcomes.insert(worker, outcome);
}

impl Orchestrator {
    /// Create an orchestrator for a validated configuration
    pub fn new(config: TrialConfig) -> Result<Orchestrator, TrialError> {
        config.validate()?;
        Ok(Orchestrator {
            config: Arc::new(config),
        })
    }
    /// The configuration in use
    pub fn config(&self) -> &TrialConfig {
        &self.config
    }
    /// Prepare the output directory: create it, record the configuration, and clear metrics from earlier runs
    fn prepare_output(&self) -> Result<(), TrialError> {
        let config = &self.config;
        fs::create_dir_all(&config.output_dir).map_err(|err| TrialError::io(&config.output_dir, err))?;
        let manifest = config.manifest_path();
        let file = File::create(&manifest).map_err(|err| TrialError::io(&manifest, err))?;
        serde_json::to_writer_pretty(file, &**config)?;
        for worker in 0..config.workers {
            let path = config.trial_path(worker);
            match fs::remove_file(&path) {
                Ok(()) => debug!(worker, "Removed stale metrics"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(TrialError::io(path, err)),
            }
        }
        Ok(())
    }
    /// Run every worker on its own copy of `data`, wait for all of them, and average their metrics.
    ///
    /// `on_finished` is called on the calling thread as each worker finishes, fails, or times out.
    pub fn run<T, C>(
        &self,
        data: &TrainingData,
        trainer: Arc<T>,
        mut on_finished: C,
    ) -> Result<TrialReport, TrialError>
    where
        T: Trainer + ?Sized + 'static,
        C: FnMut(usize, &WorkerOutcome),
    {
        let config = &self.config;
        self.prepare_output()?;
        info!(
            workers = config.workers,
            train = data.train.len(),
            validation = data.validation.len(),
            "Starting trials"
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<(usize, WorkerOutcome)>();
        let mut outcomes: BTreeMap<usize, WorkerOutcome> = BTreeMap::new();
        let mut handles: BTreeMap<usize, JoinHandle<()>> = BTreeMap::new();

        for worker in 0..config.workers {
            let ctx = WorkerContext::with_cancel(worker, config.clone(), cancel.clone());
            let data = data.clone();
            let trainer = trainer.clone();
            let tx = tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("trial-{}", worker))
                .spawn(move || {
                    let _span = info_span!("worker", worker).entered();
                    debug!("Training");
                    let outcome = run_worker(&*trainer, &ctx, data);
                    // The orchestrator may have stopped listening after a timeout
                    let _ = tx.send((worker, outcome));
                });
            match spawned {
                Ok(handle) => {
                    handles.insert(worker, handle);
                }
                Err(err) => {
                    let outcome =
                        WorkerOutcome::Failed(FailureKind::Error(format!("could not spawn: {}", err)));
                    on_finished(worker, &outcome);
                    outcomes.insert(worker, outcome);
                }
            }
        }
        drop(tx);

        // Barrier: wait until every worker has reported, or the deadline passes
        let deadline = config.timeout.map(|timeout| Instant::now() + timeout);
        while outcomes.len() < config.workers {
            let received = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        Err(RecvTimeoutError::Timeout)
                    } else {
                        rx.recv_timeout(deadline - now)
                    }
                }
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok((worker, outcome)) => record(&mut outcomes, &mut on_finished, worker, outcome),
                Err(RecvTimeoutError::Timeout) => {
                    // Reports queued before the deadline still count
                    while let Ok((worker, outcome)) = rx.try_recv() {
                        record(&mut outcomes, &mut on_finished, worker, outcome);
                    }
                    if outcomes.len() == config.workers {
                        break;
                    }
                    cancel.store(true, Ordering::Relaxed);
                    for worker in 0..config.workers {
                        if !outcomes.contains_key(&worker) {
                            warn!(worker, "Worker timed out");
                            let outcome = WorkerOutcome::Failed(FailureKind::TimedOut);
                            on_finished(worker, &outcome);
                            outcomes.insert(worker, outcome);
                            // Left detached: a worker ignoring cancellation must not block the run
                            handles.remove(&worker);
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    for worker in 0..config.workers {
                        if !outcomes.contains_key(&worker) {
                            let outcome = WorkerOutcome::Failed(FailureKind::Panicked(
                                "exited without reporting".into(),
                            ));
                            on_finished(worker, &outcome);
                            outcomes.insert(worker, outcome);
                        }
                    }
                }
            }
        }
        for (worker, handle) in handles {
            if handle.join().is_err() {
                warn!(worker, "Worker thread panicked after reporting");
            }
        }

        self.collect(outcomes)
    }
    /// Read back every finished worker's metrics and aggregate them under the configured policies
    fn collect(&self, outcomes: BTreeMap<usize, WorkerOutcome>) -> Result<TrialReport, TrialError> {
        let config = &self.config;
        let mut failures = Vec::new();
        let mut finished = Vec::new();
        for (worker, outcome) in outcomes {
            match outcome {
                WorkerOutcome::Finished { path, .. } => finished.push((worker, path)),
                WorkerOutcome::Failed(kind) => failures.push(WorkerFailure { worker, kind }),
            }
        }
        if !failures.is_empty() && config.failure_policy == FailurePolicy::FailFast {
            return Err(TrialError::WorkersFailed(failures));
        }

        let mut tables = BTreeMap::new();
        for (worker, path) in finished {
            match load_worker_table(&path, worker) {
                Ok(table) => {
                    tables.insert(worker, table);
                }
                Err(TrialError::WorkerResultMissing { worker, path })
                    if config.failure_policy == FailurePolicy::Survivors =>
                {
                    warn!(worker, path = %path.display(), "Worker metrics missing");
                    failures.push(WorkerFailure {
                        worker,
                        kind: FailureKind::ResultMissing(path),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        failures.sort_by_key(|failure| failure.worker);

        let collected: Vec<MetricsTable> = tables.values().cloned().collect();
        let mean = aggregate(&collected, config.length_policy)?;
        save_table(&config.mean_path(), &mean)?;
        info!(
            workers = tables.len(),
            failed = failures.len(),
            epochs = mean.len(),
            "Aggregated trial metrics"
        );
        Ok(TrialReport {
            mean,
            tables,
            failures,
        })
    }
}
