/*!
Parallel training trials for stock price forecasting models, written in Rust.

Turns a daily closing price series into overlapping windows with next-day targets, then trains several
independent copies of a model on the same data at once and averages their per-epoch metrics.
Models plug in through the [`Trainer`](trial::Trainer) trait: a linear autoregressive [baseline] is always
available, and an LSTM built on PyTorch bindings lives behind the `torch` feature.
*/
#![forbid(missing_docs)]

pub mod baseline;
pub mod config;
pub mod data;
pub mod error;
#[cfg(feature = "torch")]
pub mod lstm;
pub mod metrics;
pub mod trial;
pub mod util;

pub use config::TrialConfig;
pub use error::TrialError;

/// The floating point type to be used for CPU calculations
pub type CpuFloat = f64;

/// The floating point type to be used for GPU calculations
pub type GpuFloat = f32;
