//! Portfolio allocation trained end to end against a differentiable Sharpe ratio.
//!
//! A convolutional [`WeightPredictor`] reads a lookback window of per-asset features
//! and emits one simplex row of weights per sample; [`SharpeLoss`] scores those
//! weights on the prices of each sample's window; [`train`] runs the Adam loop.

pub mod data;
pub mod error;
pub mod loss;
pub mod models;
pub mod modules;
pub mod training;
pub mod utils;

pub use data::prices::{PriceTable, PricedWindows, Window};
pub use error::{Error, Result};
pub use loss::{SharpeLoss, SharpeLossConfig};
pub use models::convnet::model::{WeightPredictor, WeightPredictorConfig};
pub use training::{train, TrainingConfig, TrainingHistory};
