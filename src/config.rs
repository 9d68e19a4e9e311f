/*!
Run configuration, shared immutably between the orchestrator and every worker
*/
use crate::error::TrialError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What to do when some workers fail to produce results
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Any failed worker fails the whole run
    FailFast,
    /// Aggregate over the workers which succeeded
    Survivors,
}

impl Default for FailurePolicy {
    fn default() -> FailurePolicy {
        FailurePolicy::FailFast
    }
}

/// What to do when workers report metric tables of different lengths, e.g. after early stopping
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LengthPolicy {
    /// Unequal lengths fail the whole run
    FailFast,
    /// Truncate every table to the shortest one
    Truncate,
}

impl Default for LengthPolicy {
    fn default() -> LengthPolicy {
        LengthPolicy::FailFast
    }
}

/// A policy name which could not be parsed
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnknownPolicy(pub String);

impl fmt::Display for UnknownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown policy {:?}", self.0)
    }
}

impl std::error::Error for UnknownPolicy {}

impl FromStr for FailurePolicy {
    type Err = UnknownPolicy;
    fn from_str(s: &str) -> Result<FailurePolicy, UnknownPolicy> {
        match s {
            "fail-fast" => Ok(FailurePolicy::FailFast),
            "survivors" => Ok(FailurePolicy::Survivors),
            other => Err(UnknownPolicy(other.into())),
        }
    }
}

impl FromStr for LengthPolicy {
    type Err = UnknownPolicy;
    fn from_str(s: &str) -> Result<LengthPolicy, UnknownPolicy> {
        match s {
            "fail-fast" => Ok(LengthPolicy::FailFast),
            "truncate" => Ok(LengthPolicy::Truncate),
            other => Err(UnknownPolicy(other.into())),
        }
    }
}

/// The configuration of a set of parallel training trials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialConfig {
    /// The number of past days fed to the model for each prediction
    pub window_len: usize,
    /// The number of independent workers to train
    pub workers: usize,
    /// The maximum number of epochs each worker trains for
    pub epochs: usize,
    /// The minibatch size
    pub batch_size: usize,
    /// The fraction of windows used for training; the rest are used for validation
    pub split_fraction: f64,
    /// The optimizer's learning rate
    pub learning_rate: f64,
    /// Stop a worker early after this many epochs without validation loss improvement
    pub patience: Option<usize>,
    /// The base random seed. Worker `i` is seeded with `seed + i`
    pub seed: u64,
    /// How long to wait for workers before giving up on them
    pub timeout: Option<Duration>,
    /// Where per-worker and aggregated metrics are written
    pub output_dir: PathBuf,
    /// What to do about failed workers
    pub failure_policy: FailurePolicy,
    /// What to do about metric tables of different lengths
    pub length_policy: LengthPolicy,
}

impl Default for TrialConfig {
    fn default() -> TrialConfig {
        TrialConfig {
            window_len: 60,
            workers: 4,
            epochs: 20,
            batch_size: 32,
            split_fraction: 0.8,
            learning_rate: 0.01,
            patience: None,
            seed: 0,
            timeout: None,
            output_dir: PathBuf::from("trials"),
            failure_policy: FailurePolicy::default(),
            length_policy: LengthPolicy::default(),
        }
    }
}

impl TrialConfig {
    /// Check that every parameter is in range
    pub fn validate(&self) -> Result<(), TrialError> {
        let positive = [
            ("window_len", self.window_len),
            ("workers", self.workers),
            ("epochs", self.epochs),
            ("batch_size", self.batch_size),
        ];
        for (name, value) in positive.iter() {
            if *value == 0 {
                return Err(TrialError::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        if !(self.split_fraction > 0.0 && self.split_fraction < 1.0) {
            return Err(TrialError::InvalidConfig(format!(
                "split_fraction must be in (0, 1), got {}",
                self.split_fraction
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(TrialError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.patience == Some(0) {
            return Err(TrialError::InvalidConfig("patience must be positive".into()));
        }
        if self.timeout == Some(Duration::from_secs(0)) {
            return Err(TrialError::InvalidConfig("timeout must be positive".into()));
        }
        Ok(())
    }
    /// Where worker `worker` persists its metrics
    pub fn trial_path(&self, worker: usize) -> PathBuf {
        self.output_dir.join(format!("trial_{}.csv", worker))
    }
    /// Where the aggregated metrics are written
    pub fn mean_path(&self) -> PathBuf {
        self.output_dir.join("mean.csv")
    }
    /// Where the configuration of a run is recorded
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join("config.json")
    }
    /// The random seed of a given worker
    pub fn worker_seed(&self, worker: usize) -> u64 {
        self.seed.wrapping_add(worker as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        TrialConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_parameters_are_rejected() {
        let bad = [
            TrialConfig {
                window_len: 0,
                ..Default::default()
            },
            TrialConfig {
                workers: 0,
                ..Default::default()
            },
            TrialConfig {
                epochs: 0,
                ..Default::default()
            },
            TrialConfig {
                batch_size: 0,
                ..Default::default()
            },
            TrialConfig {
                split_fraction: 1.0,
                ..Default::default()
            },
            TrialConfig {
                split_fraction: f64::NAN,
                ..Default::default()
            },
            TrialConfig {
                learning_rate: 0.0,
                ..Default::default()
            },
            TrialConfig {
                patience: Some(0),
                ..Default::default()
            },
            TrialConfig {
                timeout: Some(Duration::from_secs(0)),
                ..Default::default()
            },
        ];
        for config in bad.iter() {
            match config.validate() {
                Err(TrialError::InvalidConfig(_)) => {}
                other => panic!("Expected {:?} to be invalid, got {:?}", config, other),
            }
        }
    }

    #[test]
    fn paths_are_keyed_by_worker() {
        let config = TrialConfig {
            output_dir: PathBuf::from("out"),
            ..Default::default()
        };
        assert_eq!(config.trial_path(3), PathBuf::from("out/trial_3.csv"));
        assert_eq!(config.mean_path(), PathBuf::from("out/mean.csv"));
        assert_eq!(config.worker_seed(3), 3);
    }

    #[test]
    fn policies_parse() {
        assert_eq!("survivors".parse(), Ok(FailurePolicy::Survivors));
        assert_eq!("truncate".parse(), Ok(LengthPolicy::Truncate));
        assert!("whatever".parse::<LengthPolicy>().is_err());
    }
}
