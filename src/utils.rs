use burn::tensor::{backend::Backend, Data, ElementConversion, Shape, Tensor};

/// Builds a float tensor from host values laid out row-major in `dims`.
pub fn tensor_from_vec<B: Backend, const D: usize>(values: Vec<f32>, dims: [usize; D]) -> Tensor<B, D> {
    let data = Data::new(values, Shape::new(dims));
    Tensor::from_data(data.convert())
}

pub fn tensor_to_vec<B: Backend, const D: usize>(x: Tensor<B, D>) -> Vec<f32> {
    x.into_data().convert::<f32>().value
}

pub fn scalar<B: Backend>(x: Tensor<B, 1>) -> f32 {
    x.into_scalar().elem::<f32>()
}

/// Value of a weighted basket at each step: `[T, N] x [1, N] -> [T, 1]`.
pub fn portfolio_values<B: Backend>(prices: Tensor<B, 2>, weights: Tensor<B, 2>) -> Tensor<B, 2> {
    (prices * weights).sum_dim(1)
}

/// Period-over-period simple returns of a `[T, 1]` series, `[T - 1, 1]`.
pub fn simple_returns<B: Backend>(values: Tensor<B, 2>) -> Tensor<B, 2> {
    let [steps, cols] = values.dims();
    let current = values.clone().slice([1..steps, 0..cols]);
    let previous = values.slice([0..steps - 1, 0..cols]);

    current / previous - 1.0
}

/// Mean and population standard deviation over every element.
pub fn mean_std<B: Backend>(x: Tensor<B, 2>) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let mean = x.clone().mean();
    let centered = x - mean.clone().unsqueeze::<2>();
    let variance = (centered.clone() * centered).mean();

    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn returns_and_moments() {
        let prices = tensor_from_vec::<TestBackend, 2>(vec![100.0, 50.0, 110.0, 40.0, 99.0, 60.0], [3, 2]);
        let weights = tensor_from_vec::<TestBackend, 2>(vec![1.0, 0.0], [1, 2]);

        let values = portfolio_values(prices, weights);
        assert_eq!(values.dims(), [3, 1]);

        let returns = simple_returns(values);
        let got = tensor_to_vec(returns.clone());
        assert!((got[0] - 0.1).abs() < 1e-6);
        assert!((got[1] + 0.1).abs() < 1e-6);

        let (mean, std) = mean_std(returns);
        assert!(scalar(mean).abs() < 1e-6);
        assert!((scalar(std) - 0.1).abs() < 1e-6);
    }
}
