use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};

use crate::data::prices::PriceTable;
use crate::error::Error;
use crate::modules::simplex::{Simplex, SimplexConfig};

use super::block::{ConvPoolBlock, ConvPoolBlockConfig};

/// Convolutional allocator.
///
/// Input is `[batch, window_length, num_assets, num_fields]`: the lookback window is
/// read as channels and the asset x field grid as the image, so each kernel learns
/// local co-movement between neighbouring assets and fields. Output is
/// `[batch, output_dim]`, one simplex row of portfolio weights per sample.
#[derive(Module, Debug)]
pub struct WeightPredictor<B: Backend> {
    window_length: usize,
    num_assets: usize,
    num_fields: usize,
    output_dim: usize,
    blocks: Vec<ConvPoolBlock<B>>,
    hidden: Linear<B>,
    output: Linear<B>,
    simplex: Simplex,
}

impl<B: Backend> WeightPredictor<B> {
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .blocks
            .iter()
            .fold(features, |x, block| block.forward(x));

        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = self.hidden.forward(x);
        let x = activation::relu(x);
        let x = self.output.forward(x);

        self.simplex.forward(x)
    }

    /// Checks the feature tensor against the configured grid before running `forward`.
    pub fn predict(&self, features: Tensor<B, 4>) -> crate::error::Result<Tensor<B, 2>> {
        let [batch, window_length, num_assets, num_fields] = features.dims();
        if batch == 0 {
            return Err(Error::Shape("empty feature batch".to_string()));
        }
        if [window_length, num_assets, num_fields]
            != [self.window_length, self.num_assets, self.num_fields]
        {
            return Err(Error::Shape(format!(
                "features are {window_length}x{num_assets}x{num_fields} (window x assets x fields), model expects {}x{}x{}",
                self.window_length, self.num_assets, self.num_fields
            )));
        }

        Ok(self.forward(features))
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn check_prices(&self, prices: &PriceTable) -> crate::error::Result<()> {
        check_assets(self.num_assets, self.output_dim, prices)
    }
}

fn check_assets(num_assets: usize, output_dim: usize, prices: &PriceTable) -> crate::error::Result<()> {
    if output_dim != prices.num_assets() || num_assets != prices.num_assets() {
        return Err(Error::Shape(format!(
            "model covers {num_assets} input assets and {output_dim} weights, price table has {} assets",
            prices.num_assets()
        )));
    }
    Ok(())
}

#[derive(Config, Debug)]
pub struct WeightPredictorConfig {
    pub window_length: usize,
    pub num_assets: usize,
    pub num_fields: usize,

    #[config(default = 16)]
    hidden_channels: usize,

    #[config(default = 3)]
    num_blocks: usize,

    #[config(default = 2)]
    kernel_size: usize,

    #[config(default = 1)]
    padding: usize,

    #[config(default = 2)]
    pool_size: usize,

    #[config(default = 64)]
    hidden_width: usize,

    #[config(default = 4)]
    pub output_dim: usize,
}

impl WeightPredictorConfig {
    fn block_configs(&self) -> Vec<ConvPoolBlockConfig> {
        (0..self.num_blocks)
            .map(|idx| {
                let d_input = if idx == 0 {
                    self.window_length
                } else {
                    self.hidden_channels
                };
                ConvPoolBlockConfig::new(d_input, self.hidden_channels)
                    .with_kernel_size(self.kernel_size)
                    .with_padding(self.padding)
                    .with_pool_size(self.pool_size)
            })
            .collect()
    }

    /// Validates the configuration and returns the flattened width fed to the dense head.
    pub fn validate(&self) -> crate::error::Result<usize> {
        let positive = [
            ("window_length", self.window_length),
            ("num_assets", self.num_assets),
            ("num_fields", self.num_fields),
            ("hidden_channels", self.hidden_channels),
            ("num_blocks", self.num_blocks),
            ("kernel_size", self.kernel_size),
            ("pool_size", self.pool_size),
            ("hidden_width", self.hidden_width),
            ("output_dim", self.output_dim),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{name} must be positive")));
        }

        let mut size = [self.num_assets, self.num_fields];
        for (idx, block) in self.block_configs().iter().enumerate() {
            size = block.output_size(size).ok_or_else(|| {
                Error::Shape(format!(
                    "{}x{} asset/field grid collapses at conv block {idx}",
                    self.num_assets, self.num_fields
                ))
            })?;
        }

        Ok(self.hidden_channels * size[0] * size[1])
    }

    pub fn check_prices(&self, prices: &PriceTable) -> crate::error::Result<()> {
        check_assets(self.num_assets, self.output_dim, prices)
    }

    pub fn init<B: Backend>(&self) -> crate::error::Result<WeightPredictor<B>> {
        let d_flat = self.validate()?;

        let blocks = self
            .block_configs()
            .iter()
            .map(|block| block.init())
            .collect();

        Ok(WeightPredictor {
            window_length: self.window_length,
            num_assets: self.num_assets,
            num_fields: self.num_fields,
            output_dim: self.output_dim,
            blocks,
            hidden: LinearConfig::new(d_flat, self.hidden_width).init(),
            output: LinearConfig::new(self.hidden_width, self.output_dim).init(),
            simplex: SimplexConfig::new().with_dim(1).init(),
        })
    }
}
