use burn::config::Config;
use burn::tensor::{backend::Backend, Tensor};

use crate::data::prices::PricedWindows;
use crate::error::Error;
use crate::utils::{mean_std, portfolio_values, simple_returns, tensor_from_vec, tensor_to_vec};

/// Negative Sharpe ratio of the portfolios described by a batch of weight rows.
///
/// Each row of `weights` is held over the prices of its own window. The value series
/// of the basket is turned into simple returns and scored with
/// `mean(returns) / std(returns)` (population std). The batch loss is the mean of
/// the negated per-sample ratios, so minimizing it maximizes the Sharpe ratio.
#[derive(Clone, Debug)]
pub struct SharpeLoss {
    min_return_std: f32,
}

#[derive(Config, Debug)]
pub struct SharpeLossConfig {
    /// Windows whose return std falls below this are rejected as degenerate.
    #[config(default = 1e-6)]
    pub min_return_std: f32,
}

impl SharpeLossConfig {
    pub fn init(&self) -> SharpeLoss {
        SharpeLoss {
            min_return_std: self.min_return_std,
        }
    }
}

impl SharpeLoss {
    pub fn forward<B: Backend>(
        &self,
        weights: Tensor<B, 2>,
        windows: &PricedWindows,
    ) -> crate::error::Result<Tensor<B, 1>> {
        let [batch, num_assets] = weights.dims();
        let prices = windows.prices();

        if batch == 0 || windows.is_empty() {
            return Err(Error::Shape("empty batch".to_string()));
        }
        if batch != windows.len() {
            return Err(Error::Shape(format!(
                "{batch} weight rows for {} windows",
                windows.len()
            )));
        }
        if num_assets != prices.num_assets() {
            return Err(Error::Shape(format!(
                "{num_assets} weights per sample, price table has {} assets",
                prices.num_assets()
            )));
        }

        let mut ratios = Vec::with_capacity(batch);
        let mut stds = Vec::with_capacity(batch);

        for (idx, window) in windows.windows().iter().enumerate() {
            let window_prices: Tensor<B, 2> =
                tensor_from_vec(prices.window_matrix(window), [window.len(), num_assets]);
            let row = weights.clone().slice([idx..idx + 1, 0..num_assets]);

            let values = portfolio_values(window_prices, row);
            let returns = simple_returns(values);
            let (mean, std) = mean_std(returns);

            ratios.push(mean / std.clone());
            stds.push(std);
        }

        // Only reads values; the graph below is untouched. A NaN or infinite std comes
        // from non-finite weights and is left for the caller to see in the loss value.
        let observed = tensor_to_vec(Tensor::cat(stds, 0).detach());
        for (window, std) in windows.windows().iter().zip(observed) {
            if std.is_finite() && std < self.min_return_std {
                return Err(Error::DegenerateWindow {
                    start: window.start,
                    end: window.end,
                    reason: format!("portfolio return std {std} below {}", self.min_return_std),
                });
            }
        }

        Ok(Tensor::cat(ratios, 0).neg().mean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::prices::{PriceTable, Window};
    use crate::utils::scalar;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn weights(values: Vec<f32>, batch: usize, assets: usize) -> Tensor<TestBackend, 2> {
        tensor_from_vec(values, [batch, assets])
    }

    fn sharpe(returns: &[f32]) -> f32 {
        let n = returns.len() as f32;
        let mean = returns.iter().sum::<f32>() / n;
        let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f32>() / n;
        mean / var.sqrt()
    }

    fn three_asset_table() -> PriceTable {
        PriceTable::from_rows(vec![
            vec![100.0, 102.0, 101.0, 104.0, 108.0, 107.0, 110.0],
            vec![50.0, 49.0, 51.0, 50.5, 52.0, 51.0, 53.5],
            vec![20.0, 21.0, 20.5, 20.0, 19.0, 19.5, 20.2],
        ])
        .unwrap()
    }

    #[test]
    fn single_asset_matches_hand_computation() {
        let prices = three_asset_table();
        let windows = PricedWindows::new(prices, vec![Window::new(0, 5).unwrap()]).unwrap();

        let loss = SharpeLossConfig::new()
            .init()
            .forward(weights(vec![1.0, 0.0, 0.0], 1, 3), &windows)
            .unwrap();

        let expected = -sharpe(&[0.02, 101.0 / 102.0 - 1.0, 104.0 / 101.0 - 1.0, 108.0 / 104.0 - 1.0]);
        assert!((scalar(loss) - expected).abs() < 1e-4);
    }

    #[test]
    fn constant_growth_is_degenerate() {
        let prices = PriceTable::from_rows(vec![
            vec![100.0, 110.0, 121.0],
            vec![10.0, 11.0, 9.0],
            vec![5.0, 6.0, 7.0],
            vec![1.0, 2.0, 1.0],
        ])
        .unwrap();
        let windows = PricedWindows::new(prices, vec![Window::new(0, 3).unwrap()]).unwrap();

        let result = SharpeLossConfig::new()
            .init()
            .forward(weights(vec![1.0, 0.0, 0.0, 0.0], 1, 4), &windows);

        assert!(matches!(
            result,
            Err(Error::DegenerateWindow { start: 0, end: 3, .. })
        ));
    }

    #[test]
    fn batch_loss_is_mean_of_samples() {
        let prices = three_asset_table();
        let first = Window::new(0, 5).unwrap();
        let second = Window::new(2, 7).unwrap();
        let loss = SharpeLossConfig::new().init();

        let rows = vec![0.2, 0.5, 0.3, 0.6, 0.1, 0.3];
        let batch = PricedWindows::new(prices.clone(), vec![first, second]).unwrap();
        let batch_loss = scalar(loss.forward(weights(rows.clone(), 2, 3), &batch).unwrap());

        let alone = |window: Window, row: &[f32]| {
            let windows = PricedWindows::new(prices.clone(), vec![window]).unwrap();
            scalar(loss.forward(weights(row.to_vec(), 1, 3), &windows).unwrap())
        };
        let expected = (alone(first, &rows[0..3]) + alone(second, &rows[3..6])) / 2.0;

        assert!(batch_loss.is_finite());
        assert!((batch_loss - expected).abs() < 1e-5);
    }

    #[test]
    fn rescaled_weights_give_the_same_loss() {
        let prices = three_asset_table();
        let windows = PricedWindows::new(prices, vec![Window::new(1, 7).unwrap()]).unwrap();
        let loss = SharpeLossConfig::new().init();

        let row = [0.1_f32, 0.7, 0.2];
        let scaled: Vec<f32> = row.iter().map(|w| w * 3.5).collect();
        let total: f32 = scaled.iter().sum();
        let renormalized = scaled.iter().map(|w| w / total).collect();

        let base = scalar(loss.forward(weights(row.to_vec(), 1, 3), &windows).unwrap());
        let again = scalar(loss.forward(weights(renormalized, 1, 3), &windows).unwrap());

        assert!((base - again).abs() < 1e-5);
    }

    #[test]
    fn non_finite_weights_surface_in_the_loss() {
        let prices = three_asset_table();
        let windows = PricedWindows::new(prices, vec![Window::new(0, 5).unwrap()]).unwrap();

        let loss = SharpeLossConfig::new()
            .init()
            .forward(weights(vec![f32::NAN, 0.5, 0.5], 1, 3), &windows)
            .unwrap();

        assert!(!scalar(loss).is_finite());
    }

    #[test]
    fn empty_batch_is_rejected() {
        let windows = PricedWindows::new(three_asset_table(), Vec::new()).unwrap();

        let result = SharpeLossConfig::new()
            .init()
            .forward(weights(Vec::new(), 0, 3), &windows);
        assert!(matches!(result, Err(Error::Shape(_))));
    }

    #[test]
    fn weight_shape_must_match_windows_and_assets() {
        let prices = three_asset_table();
        let windows = PricedWindows::new(prices, vec![Window::new(0, 4).unwrap()]).unwrap();
        let loss = SharpeLossConfig::new().init();

        let too_many_rows = loss.forward(weights(vec![0.5, 0.25, 0.25, 0.5, 0.25, 0.25], 2, 3), &windows);
        assert!(matches!(too_many_rows, Err(Error::Shape(_))));

        let too_few_assets = loss.forward(weights(vec![0.5, 0.5], 1, 2), &windows);
        assert!(matches!(too_few_assets, Err(Error::Shape(_))));
    }
}
