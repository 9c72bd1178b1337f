use burn::config::Config;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::prices::PriceTable;
use crate::error::Error;

/// Geometric random walk market, one independent walk per asset.
///
/// Asset `i` drifts by `drift * (1 + i) / num_assets` per step so that assets are
/// distinguishable; shocks are uniform with the given standard deviation.
#[derive(Config, Debug)]
pub struct SyntheticMarketConfig {
    pub num_assets: usize,
    pub num_steps: usize,

    #[config(default = 100.0)]
    pub initial_price: f32,

    #[config(default = 0.001)]
    pub drift: f32,

    #[config(default = 0.02)]
    pub volatility: f32,

    #[config(default = 42)]
    pub seed: u64,
}

impl SyntheticMarketConfig {
    pub fn generate(&self) -> crate::error::Result<PriceTable> {
        if self.initial_price <= 0.0 || self.volatility < 0.0 {
            return Err(Error::Config(format!(
                "initial_price {} and volatility {} must be positive",
                self.initial_price, self.volatility
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        // Uniform(-h, h) has std h / sqrt(3).
        let half_width = self.volatility * 3.0_f32.sqrt();

        let rows = (0..self.num_assets)
            .map(|asset| {
                let drift = self.drift * (asset + 1) as f32 / self.num_assets as f32;
                let mut price = self.initial_price;
                (0..self.num_steps)
                    .map(|step| {
                        if step > 0 {
                            let shock = if half_width > 0.0 {
                                rng.gen_range(-half_width..half_width)
                            } else {
                                0.0
                            };
                            price *= (drift + shock).exp();
                        }
                        price
                    })
                    .collect()
            })
            .collect();

        PriceTable::from_rows(rows)
    }
}
