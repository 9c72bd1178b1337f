use std::sync::Arc;

use burn::config::Config;
use burn::data::dataloader::DataLoader;
use burn::module::{AutodiffModule, Module, ModuleVisitor, ParamId};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use tracing::{debug, info};

use crate::data::batchitem::WindowBatch;
use crate::data::prices::{PriceTable, PricedWindows};
use crate::error::Error;
use crate::loss::{SharpeLoss, SharpeLossConfig};
use crate::models::convnet::model::{WeightPredictor, WeightPredictorConfig};
use crate::utils::{scalar, tensor_to_vec};

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: WeightPredictorConfig,

    #[config(default = "SharpeLossConfig::new()")]
    pub loss: SharpeLossConfig,

    #[config(default = 1)]
    pub num_epochs: usize,

    #[config(default = 32)]
    pub batch_size: usize,

    #[config(default = 1e-1)]
    pub learning_rate: f64,

    #[config(default = 1e-4)]
    pub weight_decay: f32,

    /// Report the training loss every `print_freq` batches.
    #[config(default = 100)]
    pub print_freq: usize,

    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.print_freq == 0 {
            return Err(Error::Config("print_freq must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::Config(format!(
                "learning_rate {} must be a positive number",
                self.learning_rate
            )));
        }
        self.model.validate()?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Valid,
}

#[derive(Clone, Debug)]
pub struct ProgressReport {
    pub epoch: usize,
    pub batch: usize,
    pub split: Split,
    pub loss: f32,
}

#[derive(Clone, Debug)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train_loss: Option<f32>,
    pub valid_loss: Option<f32>,
    pub train_batches: usize,
    pub valid_batches: usize,
}

#[derive(Clone, Debug, Default)]
pub struct TrainingHistory {
    pub reports: Vec<ProgressReport>,
    pub epochs: Vec<EpochSummary>,
}

impl TrainingHistory {
    pub fn reports_for(&self, split: Split) -> impl Iterator<Item = &ProgressReport> {
        self.reports.iter().filter(move |report| report.split == split)
    }
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

fn check_binding(windows: &PricedWindows, prices: &PriceTable) -> crate::error::Result<()> {
    if !windows.prices().same_table(prices) {
        return Err(Error::Shape(
            "batch windows index a different price table than the run".to_string(),
        ));
    }
    Ok(())
}

/// Visits every parameter and looks its gradient up, flagging NaN or infinite entries.
struct FiniteGradients<'a> {
    grads: &'a GradientsParams,
    finite: bool,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for FiniteGradients<'_> {
    fn visit_float<const D: usize>(&mut self, id: &ParamId, _tensor: &Tensor<B, D>) {
        if !self.finite {
            return;
        }
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.finite = tensor_to_vec(grad).iter().all(|value| value.is_finite());
        }
    }
}

fn gradients_are_finite<B: AutodiffBackend>(
    model: &WeightPredictor<B>,
    grads: &GradientsParams,
) -> bool {
    let mut visitor = FiniteGradients {
        grads,
        finite: true,
    };
    model.visit(&mut visitor);
    visitor.finite
}

fn validate_epoch<B: Backend>(
    epoch: usize,
    model: &WeightPredictor<B>,
    loss_fn: &SharpeLoss,
    prices: &PriceTable,
    loader: &Arc<dyn DataLoader<WindowBatch<B>>>,
    history: &mut TrainingHistory,
) -> crate::error::Result<Vec<f32>> {
    let mut losses = Vec::new();

    for (batch_idx, batch) in loader.iter().enumerate() {
        check_binding(&batch.windows, prices)?;
        let weights = model.predict(batch.features)?;
        let loss = scalar(loss_fn.forward(weights, &batch.windows)?);
        if !loss.is_finite() {
            return Err(Error::NonFiniteLoss {
                what: "validation loss",
                epoch,
                batch: batch_idx,
            });
        }

        info!(epoch, batch = batch_idx, loss, "valid");
        history.reports.push(ProgressReport {
            epoch,
            batch: batch_idx,
            split: Split::Valid,
            loss,
        });
        losses.push(loss);
    }

    Ok(losses)
}

/// Trains `model` for `config.num_epochs` epochs, validating after each one.
///
/// Every batch must be bound to `prices`, the table the model's output dimension was
/// checked against. The run aborts on the first shape problem, degenerate window or
/// non-finite loss/gradient; parameters are never updated from a non-finite step.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    model: WeightPredictor<B>,
    prices: &PriceTable,
    train_loader: Arc<dyn DataLoader<WindowBatch<B>>>,
    valid_loader: Arc<dyn DataLoader<WindowBatch<B::InnerBackend>>>,
) -> crate::error::Result<(WeightPredictor<B>, TrainingHistory)> {
    config.validate()?;
    config.model.check_prices(prices)?;
    model.check_prices(prices)?;

    let mut optim = AdamConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay.into())))
        .init();
    let loss_fn = config.loss.init();

    let mut model = model;
    let mut history = TrainingHistory::default();

    info!(
        epochs = config.num_epochs,
        learning_rate = config.learning_rate,
        assets = prices.num_assets(),
        steps = prices.num_steps(),
        "starting training"
    );

    for epoch in 0..config.num_epochs {
        let mut train_losses = Vec::new();

        for (batch_idx, batch) in train_loader.iter().enumerate() {
            check_binding(&batch.windows, prices)?;

            let weights = model.predict(batch.features)?;
            let loss = loss_fn.forward(weights, &batch.windows)?;
            let value = scalar(loss.clone());
            if !value.is_finite() {
                return Err(Error::NonFiniteLoss {
                    what: "training loss",
                    epoch,
                    batch: batch_idx,
                });
            }

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            if !gradients_are_finite(&model, &grads) {
                return Err(Error::NonFiniteLoss {
                    what: "gradient",
                    epoch,
                    batch: batch_idx,
                });
            }
            model = optim.step(config.learning_rate, model, grads);

            debug!(epoch, batch = batch_idx, loss = value, "step");
            if (batch_idx + 1) % config.print_freq == 0 {
                info!(epoch, batch = batch_idx, loss = value, "train");
                history.reports.push(ProgressReport {
                    epoch,
                    batch: batch_idx,
                    split: Split::Train,
                    loss: value,
                });
            }
            train_losses.push(value);
        }

        let valid_losses = validate_epoch(
            epoch,
            &model.valid(),
            &loss_fn,
            prices,
            &valid_loader,
            &mut history,
        )?;

        let summary = EpochSummary {
            epoch,
            train_loss: mean(&train_losses),
            valid_loss: mean(&valid_losses),
            train_batches: train_losses.len(),
            valid_batches: valid_losses.len(),
        };
        info!(
            epoch,
            train_loss = ?summary.train_loss,
            valid_loss = ?summary.valid_loss,
            "epoch done"
        );
        history.epochs.push(summary);
    }

    Ok((model, history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::features::{FeatureCube, PRICE_FIELDS};
    use crate::data::prices::Window;
    use crate::data::synthetic::SyntheticMarketConfig;
    use crate::data::windowitem::{WindowDataset, WindowItem, WindowShape};
    use burn::backend::{Autodiff, NdArray};
    use burn::data::dataset::Dataset;

    type InnerBackend = NdArray<f32>;
    type TestBackend = Autodiff<InnerBackend>;

    fn alternating(t: usize) -> f32 {
        if t % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }

    /// Asset 0 climbs steadily, asset 2 decays steadily, the rest only oscillate.
    fn trending_prices() -> PriceTable {
        let steps = 12;
        PriceTable::from_rows(vec![
            (0..steps)
                .map(|t| 100.0 * 1.01_f32.powi(t as i32) * (1.0 + 0.002 * alternating(t)))
                .collect(),
            (0..steps).map(|t| 100.0 * (1.0 + 0.05 * alternating(t))).collect(),
            (0..steps)
                .map(|t| 100.0 * 0.99_f32.powi(t as i32) * (1.0 + 0.002 * alternating(t)))
                .collect(),
            (0..steps).map(|t| 100.0 * (1.0 + 0.03 * alternating(t + 1))).collect(),
        ])
        .unwrap()
    }

    fn trending_run(num_epochs: usize) -> (PriceTable, WindowDataset, TrainingConfig) {
        let prices = trending_prices();
        let shape = WindowShape {
            lookback: 4,
            num_assets: 4,
            num_fields: 2,
        };
        let items = (0..4)
            .map(|i| {
                let features = (0..shape.item_len())
                    .map(|j| ((i + j) % 5) as f32 / 5.0 - 0.4)
                    .collect();
                WindowItem::new(features, Window::new(i, i + 8).unwrap())
            })
            .collect();
        let dataset = WindowDataset::new(items, prices.clone(), shape).unwrap();

        let config = TrainingConfig::new(WeightPredictorConfig::new(4, 4, 2))
            .with_num_epochs(num_epochs)
            .with_batch_size(4)
            .with_learning_rate(1e-2)
            .with_print_freq(1);

        (prices, dataset, config)
    }

    fn empty_valid(prices: &PriceTable, shape: WindowShape) -> Arc<dyn DataLoader<WindowBatch<InnerBackend>>> {
        WindowDataset::new(Vec::new(), prices.clone(), shape)
            .unwrap()
            .into_loader::<InnerBackend>(4, Default::default())
    }

    #[test]
    fn training_improves_sharpe_on_a_learnable_batch() {
        TestBackend::seed(7);
        let (prices, dataset, config) = trending_run(50);
        let shape = dataset.shape();
        let model = config.model.init::<TestBackend>().unwrap();

        let (_, history) = train(
            &config,
            model,
            &prices,
            dataset.into_loader::<TestBackend>(4, Default::default()),
            empty_valid(&prices, shape),
        )
        .unwrap();

        assert_eq!(history.epochs.len(), 50);
        let first = history.epochs[0].train_loss.unwrap();
        let last = history.epochs[49].train_loss.unwrap();
        assert!(last < first, "loss went from {first} to {last}");
        assert!(history.epochs.iter().all(|e| e.valid_loss.is_none()));
    }

    #[test]
    fn one_epoch_on_a_synthetic_market() {
        TestBackend::seed(3);
        let prices = SyntheticMarketConfig::new(3, 60).generate().unwrap();
        let cube = FeatureCube::from_prices(&prices, 5).unwrap();
        let dataset = WindowDataset::from_prices(&prices, &cube, 8, 5).unwrap();
        assert_eq!(dataset.len(), 48);
        let (train_set, valid_set) = dataset.split(40.0 / 48.0).unwrap();

        let config = TrainingConfig::new(WeightPredictorConfig::new(8, 3, PRICE_FIELDS).with_output_dim(3))
            .with_batch_size(4)
            .with_learning_rate(1e-2)
            .with_print_freq(1);
        let model = config.model.init::<TestBackend>().unwrap();

        let (model, history) = train(
            &config,
            model,
            &prices,
            train_set.into_loader::<TestBackend>(config.batch_size, Default::default()),
            valid_set.into_loader::<InnerBackend>(config.batch_size, Default::default()),
        )
        .unwrap();

        assert_eq!(history.reports_for(Split::Train).count(), 10);
        assert_eq!(history.reports_for(Split::Valid).count(), 2);
        assert!(history.reports.iter().all(|r| r.loss.is_finite()));
        assert_eq!(history.epochs[0].train_batches, 10);
        assert_eq!(model.output_dim(), 3);
    }

    #[test]
    fn every_epoch_is_validated() {
        let (prices, dataset, config) = trending_run(3);
        let (train_set, valid_set) = dataset.split(0.5).unwrap();
        let model = config.model.init::<TestBackend>().unwrap();

        let (_, history) = train(
            &config,
            model,
            &prices,
            train_set.into_loader::<TestBackend>(2, Default::default()),
            valid_set.into_loader::<InnerBackend>(2, Default::default()),
        )
        .unwrap();

        assert_eq!(history.epochs.len(), 3);
        assert!(history.epochs.iter().all(|e| e.valid_batches == 1));
        assert_eq!(history.reports_for(Split::Valid).count(), 3);
    }

    #[test]
    fn output_dim_is_checked_before_training() {
        let (prices, dataset, _) = trending_run(1);
        let shape = dataset.shape();
        let config = TrainingConfig::new(WeightPredictorConfig::new(4, 4, 2).with_output_dim(3));
        let model = config.model.init::<TestBackend>().unwrap();

        let result = train(
            &config,
            model,
            &prices,
            dataset.into_loader::<TestBackend>(4, Default::default()),
            empty_valid(&prices, shape),
        );
        assert!(matches!(result, Err(Error::Shape(_))));
    }

    #[test]
    fn batches_must_share_the_run_table() {
        let (prices, dataset, config) = trending_run(1);
        let shape = dataset.shape();
        let other = trending_prices();
        let model = config.model.init::<TestBackend>().unwrap();

        let result = train(
            &config,
            model,
            &other,
            dataset.into_loader::<TestBackend>(4, Default::default()),
            empty_valid(&prices, shape),
        );
        assert!(matches!(result, Err(Error::Shape(_))));
    }

    #[test]
    fn non_finite_features_abort_before_any_update() {
        let prices = trending_prices();
        let shape = WindowShape {
            lookback: 4,
            num_assets: 4,
            num_fields: 2,
        };
        let items = (0..4)
            .map(|i| WindowItem::new(vec![f32::INFINITY; shape.item_len()], Window::new(i, i + 8).unwrap()))
            .collect();
        let dataset = WindowDataset::new(items, prices.clone(), shape).unwrap();

        let config = TrainingConfig::new(WeightPredictorConfig::new(4, 4, 2)).with_batch_size(4);
        TestBackend::seed(11);
        let model = config.model.init::<TestBackend>().unwrap();

        let result = train(
            &config,
            model,
            &prices,
            dataset.into_loader::<TestBackend>(4, Default::default()),
            empty_valid(&prices, shape),
        );
        assert!(matches!(
            result,
            Err(Error::NonFiniteLoss { epoch: 0, batch: 0, .. })
        ));
    }

    #[test]
    fn zero_print_freq_is_rejected() {
        let config = TrainingConfig::new(WeightPredictorConfig::new(4, 4, 2)).with_print_freq(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
