/*!
An LSTM forecaster on top of PyTorch bindings.

Each window is fed to the LSTM one day per step. The hidden state after the last day goes through a linear
layer to predict the next close.
*/

use crate::data::window::Dataset;
use crate::metrics::{EpochMetrics, ErrorAccumulator, MetricsTable};
use crate::trial::{Trainer, TrainingData, WorkerContext};
use crate::GpuFloat;
use anyhow::bail;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tch::nn::{self, Linear, Module, OptimizerConfig, RNNConfig, VarStore, LSTM, RNN};
use tch::{Device, Kind, Reduction, Tensor};
use tracing::{debug, info};

/// The StockLSTM model: an LSTM followed by a linear readout of its last hidden state
#[derive(Debug)]
pub struct StockLSTM {
    /// This model's LSTM layer
    pub lstm_layer: LSTM,
    /// This model's linear layer
    pub linear_layer: Linear,
}

impl StockLSTM {
    /// Predict the next value for a batch of windows of shape `[batch, window_len, 1]`, yielding shape `[batch]`
    pub fn forward(&self, xs: &Tensor) -> Tensor {
        let (hidden, _state) = self.lstm_layer.seq(xs);
        self.linear_layer
            .forward(&hidden.select(1, -1))
            .squeeze_dim(-1)
    }
    /// Compute the mean squared error on a batch
    pub fn loss(&self, xs: &Tensor, ys: &Tensor) -> Tensor {
        self.forward(xs).mse_loss(ys, Reduction::Mean)
    }
    /// The model's errors over a dataset, evaluated in batches without tracking gradients
    pub fn evaluate(&self, data: &Dataset, batch_size: usize, device: Device) -> ErrorAccumulator {
        let mut acc = ErrorAccumulator::default();
        let indices: Vec<usize> = (0..data.len()).collect();
        tch::no_grad(|| {
            for batch in indices.chunks(batch_size) {
                if let Some((xs, ys)) = make_batch(data, batch, device) {
                    let diff = self.forward(&xs) - ys;
                    acc.push_sums(
                        diff.square().sum(Kind::Double).double_value(&[]),
                        diff.abs().sum(Kind::Double).double_value(&[]),
                        batch.len(),
                    );
                }
            }
        });
        acc
    }
}

/// Package a batch of windows and their targets into tensors of shape `[batch, window_len, 1]` and `[batch]`
pub fn make_batch(data: &Dataset, indices: &[usize], device: Device) -> Option<(Tensor, Tensor)> {
    let mut inputs = Vec::with_capacity(indices.len() * data.window_len());
    let mut targets = Vec::with_capacity(indices.len());
    data.gather(indices, &mut inputs, &mut targets);
    if targets.is_empty() {
        return None;
    }
    let inputs: Vec<GpuFloat> = inputs.into_iter().map(|x| x as GpuFloat).collect();
    let targets: Vec<GpuFloat> = targets.into_iter().map(|y| y as GpuFloat).collect();
    let xs = Tensor::from_slice(&inputs)
        .view([targets.len() as i64, data.window_len() as i64, 1])
        .to_device(device);
    let ys = Tensor::from_slice(&targets).to_device(device);
    Some((xs, ys))
}

/// A descriptor for an instance of the StockLSTM model
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct StockLSTMDesc {
    /// The size of the hidden LSTM layers to use
    pub hidden: usize,
    /// The number of hidden LSTM layers to use
    pub layers: usize,
}

impl Default for StockLSTMDesc {
    fn default() -> StockLSTMDesc {
        StockLSTMDesc {
            hidden: 50,
            layers: 2,
        }
    }
}

impl StockLSTMDesc {
    /// Build a `StockLSTM` over a given `VarStore `
    pub fn build(&self, vs: &VarStore) -> StockLSTM {
        let lstm_layer = nn::lstm(
            &vs.root(),
            1,
            self.hidden as i64,
            RNNConfig {
                num_layers: self.layers as i64,
                batch_first: true,
                ..Default::default()
            },
        );
        let linear_layer = nn::linear(&vs.root(), self.hidden as i64, 1, Default::default());
        StockLSTM {
            lstm_layer,
            linear_layer,
        }
    }
}

/// Trains a fresh [`StockLSTM`] per worker with Adam
#[derive(Debug, Clone)]
pub struct LstmTrainer {
    /// The model to build
    pub desc: StockLSTMDesc,
    /// The device to train on
    pub device: Device,
    /// The gradient clipping value passed to the optimizer
    pub grad_clip: f64,
}

impl LstmTrainer {
    /// Train a model of a given shape on a device
    pub fn new(desc: StockLSTMDesc, device: Device) -> LstmTrainer {
        LstmTrainer {
            desc,
            device,
            grad_clip: 0.5,
        }
    }
}

impl Trainer for LstmTrainer {
    fn train(&self, ctx: &WorkerContext, data: TrainingData) -> anyhow::Result<MetricsTable> {
        let config = &ctx.config;
        if data.train.is_empty() {
            bail!("No training windows");
        }
        let vs = VarStore::new(self.device);
        let model = self.desc.build(&vs);
        let mut opt = nn::Adam::default().build(&vs, config.learning_rate)?;

        let mut rng = StdRng::seed_from_u64(ctx.seed);
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
                if let Some((xs, ys)) = make_batch(&data.train, batch, self.device) {
                    let loss = model.loss(&xs, &ys);
                    opt.backward_step_clip(&loss, self.grad_clip);
                }
            }

            let train = model.evaluate(&data.train, config.batch_size, self.device);
            let validation = model.evaluate(&data.validation, config.batch_size, self.device);
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

    #[test]
    fn batch_making_works() {
        let data = Dataset::from_series(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3);
        let (xs, ys) = make_batch(&data, &[0, 2], Device::Cpu).unwrap();
        assert_eq!(xs.size(), vec![2, 3, 1]);
        assert_eq!(ys.size(), vec![2]);
        assert_eq!(ys.double_value(&[1]), 6.0);
        assert_eq!(xs.double_value(&[1, 0, 0]), 3.0);
        assert!(make_batch(&data, &[9], Device::Cpu).is_none());
    }

    #[test]
    fn forward_shapes() {
        let vs = VarStore::new(Device::Cpu);
        let model = StockLSTMDesc { hidden: 8, layers: 1 }.build(&vs);
        let xs = Tensor::zeros(&[4, 5, 1], (Kind::Float, Device::Cpu));
        assert_eq!(model.forward(&xs).size(), vec![4]);
    }

    #[test]
    fn trains_a_few_epochs() {
        let config = TrialConfig {
            window_len: 5,
            epochs: 3,
            batch_size: 8,
            ..Default::default()
        };
        let series: Vec<f64> = (0..60).map(|i| (i as f64 / 4.0).sin()).collect();
        let (data, _) = TrainingData::prepare(&series, &config);
        let trainer = LstmTrainer::new(StockLSTMDesc { hidden: 8, layers: 1 }, Device::Cpu);
        let ctx = WorkerContext::new(0, Arc::new(config));
        let table = trainer.train(&ctx, data).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.iter().all(|m| m.loss.is_finite()));
    }
}
