use burn::tensor::{backend::Backend, Tensor};

use crate::data::prices::PricedWindows;

#[derive(Clone, Debug)]
pub struct WindowBatch<B: Backend> {
    pub features: Tensor<B, 4>, // [N, K, A, F]
    pub windows: PricedWindows, // N windows over one shared price table
}
