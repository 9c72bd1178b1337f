use burn::config::Config;
use burn::module::Module;
use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};

/// Maps scores onto the probability simplex along `dim` (softmax).
#[derive(Module, Debug, Clone)]
pub struct Simplex {
    dim: i32,
}

impl Simplex {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let dim: usize = if self.dim < 0 {
            D - 1
        } else {
            self.dim as usize
        };

        activation::softmax(x, dim)
    }
}

#[derive(Config, Debug)]
pub struct SimplexConfig {
    #[config(default = -1)]
    dim: i32,
}

impl SimplexConfig {
    pub fn init(&self) -> Simplex {
        Simplex { dim: self.dim }
    }
}
