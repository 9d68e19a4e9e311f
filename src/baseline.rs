/*!
A linear autoregressive baseline: the next close is predicted as a weighted sum of the window, trained with
minibatch SGD.
*/
use crate::data::window::Dataset;
use crate::metrics::{EpochMetrics, ErrorAccumulator, MetricsTable};
use crate::trial::{Trainer, TrainingData, WorkerContext};
use anyhow::{bail, format_err};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};

/// Clip a value within an absolute value range
pub fn clip(value: f64, range: f64) -> f64 {
    value.max(-range).min(range)
}

/// A linear model over a window of prices
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    /// One weight per day in the window, oldest first
    pub weights: Vec<f64>,
    /// The bias term
    pub bias: f64,
}

impl LinearModel {
    /// A model with normally distributed initial weights and zero bias
    pub fn init<R: Rng>(inputs: usize, std: f64, rng: &mut R) -> anyhow::Result<LinearModel> {
        let dist = Normal::new(0.0, std)
            .map_err(|err| format_err!("Invalid weight initialization: {:?}", err))?;
        Ok(LinearModel {
            weights: (0..inputs).map(|_| dist.sample(&mut *rng)).collect(),
            bias: 0.0,
        })
    }
    /// Predict the value following a window
    #[inline]
    pub fn predict(&self, window: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(window)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias
    }
    /// The model's errors over a dataset
    pub fn evaluate(&self, data: &Dataset) -> ErrorAccumulator {
        let mut acc = ErrorAccumulator::default();
        for (window, target) in data.iter() {
            acc.push(self.predict(window), target);
        }
        acc
    }
    /// Take one gradient step on the mean squared error of a batch, clipping each gradient component
    pub fn step(&mut self, data: &Dataset, batch: &[usize], learning_rate: f64, grad_clip: f64) {
        let mut grad_w = vec![0.0; self.weights.len()];
        let mut grad_b = 0.0;
        let mut n = 0;
        for &i in batch {
            let (window, target) = match data.get(i) {
                Some(example) => example,
                None => continue,
            };
            let residual = self.predict(window) - target;
            for (g, x) in grad_w.iter_mut().zip(window) {
                *g += residual * x;
            }
            grad_b += residual;
            n += 1;
        }
        if n == 0 {
            return;
        }
        let scale = 2.0 / n as f64;
        for (w, g) in self.weights.iter_mut().zip(grad_w) {
            *w -= learning_rate * clip(g * scale, grad_clip);
        }
        self.bias -= learning_rate * clip(grad_b * scale, grad_clip);
    }
}

/// Trains a [`LinearModel`] per worker
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LinearTrainer {
    /// Gradient components are clipped to this absolute value
    pub grad_clip: f64,
    /// The standard deviation of initial weights
    pub init_std: f64,
}

impl Default for LinearTrainer {
    fn default() -> LinearTrainer {
        LinearTrainer {
            grad_clip: 0.5,
            init_std: 0.01,
        }
    }
}

impl Trainer for LinearTrainer {
    fn train(&self, ctx: &WorkerContext, data: TrainingData) -> anyhow::Result<MetricsTable> {
        let config = &ctx.config;
        if data.train.is_empty() {
            bail!("No training windows");
        }
        let mut rng = StdRng::seed_from_u64(ctx.seed);
        let mut model = LinearModel::init(data.train.window_len(), self.init_std, &mut rng)?;
        let mut order: Vec<usize> = (0..data.train.len()).collect();
        let mut table = MetricsTable::with_capacity(config.epochs);
        let mut best_val_loss = f64::INFINITY;
        let mut stale_epochs = 0;

        for epoch in 0..config.epochs {
            if ctx.is_cancelled() {
                info!(epoch, "Cancelled");
                break;
            }
            order.shuffle(&mut rng);
            for batch in order.chunks(config.batch_size) {
                model.step(&data.train, batch, config.learning_rate, self.grad_clip);
            }

            let train = model.evaluate(&data.train);
            let validation = model.evaluate(&data.validation);
            let metrics = EpochMetrics {
                loss: train.mse(),
                val_loss: validation.mse(),
                error: train.mae(),
                val_error: validation.mae(),
            };
            if !metrics.loss.is_finite() {
                bail!("Training diverged at epoch {}", epoch);
            }
            debug!(epoch, loss = metrics.loss, val_loss = metrics.val_loss, "Epoch complete");
            table.push(metrics);

            if metrics.val_loss < best_val_loss {
                best_val_loss = metrics.val_loss;
                stale_epochs = 0;
            } else {
                stale_epochs += 1;
            }
            if let Some(patience) = config.patience {
                if stale_epochs >= patience {
                    info!(epoch, "Early stopping");
                    break;
                }
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrialConfig;
    use std::sync::Arc;

    fn context(config: TrialConfig) -> WorkerContext {
        WorkerContext::new(0, Arc::new(config))
    }

    #[test]
    fn clipping() {
        assert_eq!(clip(3.0, 0.5), 0.5);
        assert_eq!(clip(-3.0, 0.5), -0.5);
        assert_eq!(clip(0.25, 0.5), 0.25);
    }

    #[test]
    fn prediction_is_a_weighted_sum() {
        let model = LinearModel {
            weights: vec![0.5, 2.0],
            bias: 1.0,
        };
        assert_eq!(model.predict(&[2.0, 3.0]), 8.0);
    }

    #[test]
    fn loss_decreases_on_a_trend() {
        let config = TrialConfig {
            window_len: 4,
            epochs: 20,
            batch_size: 8,
            learning_rate: 0.1,
            ..Default::default()
        };
        let series: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let (data, _) = TrainingData::prepare(&series, &config);
        let table = LinearTrainer::default().train(&context(config), data).unwrap();
        assert_eq!(table.len(), 20);
        assert!(table[19].loss < table[0].loss);
        assert!(table.iter().all(|m| m.loss.is_finite() && m.val_loss.is_finite()));
    }

    #[test]
    fn same_seed_same_metrics() {
        let config = TrialConfig {
            window_len: 3,
            epochs: 5,
            batch_size: 4,
            ..Default::default()
        };
        let series: Vec<f64> = (0..50).map(|i| (i as f64 / 5.0).sin()).collect();
        let (data, _) = TrainingData::prepare(&series, &config);
        let ctx = context(config);
        let a = LinearTrainer::default().train(&ctx, data.clone()).unwrap();
        let b = LinearTrainer::default().train(&ctx, data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn early_stopping_on_a_flat_series() {
        let config = TrialConfig {
            window_len: 3,
            epochs: 10,
            patience: Some(2),
            ..Default::default()
        };
        let data = TrainingData::from_series(&[0.0; 30], &config);
        let table = LinearTrainer::default().train(&context(config), data).unwrap();
        // The first epoch sets the best loss, which never improves afterwards
        assert_eq!(table.len(), 3);
        assert!(table.iter().all(|m| m.loss == 0.0 && m.val_loss == 0.0));
    }

    #[test]
    fn no_training_windows() {
        let config = TrialConfig {
            window_len: 10,
            ..Default::default()
        };
        let data = TrainingData::from_series(&[1.0; 5], &config);
        assert!(LinearTrainer::default().train(&context(config), data).is_err());
    }
}
