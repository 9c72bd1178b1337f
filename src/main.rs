use std::path::PathBuf;

use anyhow::{anyhow, Context};
use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::tensor::backend::Backend;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sharpe_allocator::data::features::{FeatureCube, PRICE_FIELDS};
use sharpe_allocator::data::synthetic::SyntheticMarketConfig;
use sharpe_allocator::data::windowitem::{WindowBatcher, WindowDataset};
use sharpe_allocator::utils::tensor_to_vec;
use sharpe_allocator::{train, PriceTable, TrainingConfig, WeightPredictorConfig};

type InnerBackend = NdArray<f32>;
type TrainBackend = Autodiff<InnerBackend>;

/// Train a convolutional allocator against the Sharpe ratio.
#[derive(Parser, Debug)]
#[command(name = "sharpe-allocator", version)]
struct Args {
    /// Training config JSON; overrides the model and optimizer flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective training config to this path.
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// JSON array of per-asset price rows; a synthetic market is generated otherwise.
    #[arg(long)]
    prices: Option<PathBuf>,

    #[arg(long, default_value_t = 4)]
    assets: usize,

    #[arg(long, default_value_t = 600)]
    steps: usize,

    #[arg(long, default_value_t = 50)]
    lookback: usize,

    /// Number of returns each sample's weights are scored on.
    #[arg(long, default_value_t = 20)]
    horizon: usize,

    #[arg(long, default_value_t = 5)]
    ma_span: usize,

    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, default_value_t = 1e-1)]
    learning_rate: f64,

    #[arg(long, default_value_t = 100)]
    print_freq: usize,

    /// Fraction of windows, in time order, used for training.
    #[arg(long, default_value_t = 0.8)]
    train_ratio: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

impl Args {
    fn training_config(&self, num_assets: usize) -> anyhow::Result<TrainingConfig> {
        if let Some(path) = &self.config {
            return TrainingConfig::load(path)
                .map_err(|err| anyhow!("loading {}: {err:?}", path.display()));
        }

        let model = WeightPredictorConfig::new(self.lookback, num_assets, PRICE_FIELDS)
            .with_output_dim(num_assets);

        Ok(TrainingConfig::new(model)
            .with_num_epochs(self.epochs)
            .with_batch_size(self.batch_size)
            .with_learning_rate(self.learning_rate)
            .with_print_freq(self.print_freq)
            .with_seed(self.seed))
    }

    fn price_table(&self) -> anyhow::Result<PriceTable> {
        let prices = match &self.prices {
            Some(path) => PriceTable::from_json_file(path)
                .with_context(|| format!("loading prices from {}", path.display()))?,
            None => SyntheticMarketConfig::new(self.assets, self.steps)
                .with_seed(self.seed)
                .generate()?,
        };
        Ok(prices)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let prices = args.price_table()?;
    let config = args.training_config(prices.num_assets())?;
    config.validate()?;
    config.model.check_prices(&prices)?;

    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("saving config to {}", path.display()))?;
    }

    let cube = FeatureCube::from_prices(&prices, args.ma_span)?;
    let dataset = WindowDataset::from_prices(&prices, &cube, config.model.window_length, args.horizon)?;
    let shape = dataset.shape();
    let last_item = dataset
        .get(dataset.len().saturating_sub(1))
        .ok_or_else(|| anyhow!("price history too short for lookback {} and horizon {}", shape.lookback, args.horizon))?;

    let (train_set, valid_set) = dataset.split(args.train_ratio)?;
    info!(
        assets = prices.num_assets(),
        steps = prices.num_steps(),
        train = train_set.len(),
        valid = valid_set.len(),
        "windows ready"
    );

    TrainBackend::seed(config.seed);
    let model = config.model.init::<TrainBackend>()?;

    let (model, history) = train(
        &config,
        model,
        &prices,
        train_set.into_loader::<TrainBackend>(config.batch_size, Default::default()),
        valid_set.into_loader::<InnerBackend>(config.batch_size, Default::default()),
    )?;

    if let Some(last) = history.epochs.last() {
        info!(train_loss = ?last.train_loss, valid_loss = ?last.valid_loss, "finished");
    }

    let window = last_item.window();
    let batch = WindowBatcher::<InnerBackend>::new(Default::default(), prices.clone(), shape).batch(vec![last_item]);
    let weights = tensor_to_vec(model.valid().predict(batch.features)?);
    info!(start = window.start, end = window.end, ?weights, "latest allocation");

    Ok(())
}
