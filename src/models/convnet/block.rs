use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};

/// Conv2d -> ReLU -> max-pool over an (asset x field) grid.
#[derive(Module, Debug)]
pub struct ConvPoolBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvPoolBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = activation::relu(x);
        self.pool.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct ConvPoolBlockConfig {
    d_input: usize,
    d_output: usize,

    #[config(default = 2)]
    kernel_size: usize,

    #[config(default = 1)]
    padding: usize,

    #[config(default = 2)]
    pool_size: usize,
}

impl ConvPoolBlockConfig {
    /// Spatial size after convolution and pooling, `None` when the grid collapses.
    pub fn output_size(&self, [height, width]: [usize; 2]) -> Option<[usize; 2]> {
        let side = |len: usize| {
            let padded = len + 2 * self.padding;
            if padded < self.kernel_size {
                return None;
            }
            let conv = padded - self.kernel_size + 1;
            if conv < self.pool_size {
                return None;
            }
            Some((conv - self.pool_size) / self.pool_size + 1)
        };

        Some([side(height)?, side(width)?])
    }

    pub fn init<B: Backend>(&self) -> ConvPoolBlock<B> {
        let conv = Conv2dConfig::new(
            [self.d_input, self.d_output],
            [self.kernel_size, self.kernel_size],
        )
        .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
        .init();

        let pool = MaxPool2dConfig::new([self.pool_size, self.pool_size])
            .with_strides([self.pool_size, self.pool_size])
            .init();

        ConvPoolBlock { conv, pool }
    }
}
