use crate::data::prices::PriceTable;
use crate::error::{Error, Result};

/// Number of fields produced by [`FeatureCube::from_prices`].
pub const PRICE_FIELDS: usize = 2;

/// Per-step features laid out time-major: `[num_steps, num_assets, num_fields]`.
#[derive(Clone, Debug)]
pub struct FeatureCube {
    values: Vec<f32>,
    num_steps: usize,
    num_assets: usize,
    num_fields: usize,
}

impl FeatureCube {
    pub fn new(values: Vec<f32>, num_steps: usize, num_assets: usize, num_fields: usize) -> Result<Self> {
        if values.len() != num_steps * num_assets * num_fields {
            return Err(Error::Shape(format!(
                "feature cube of {num_steps}x{num_assets}x{num_fields} needs {} values, got {}",
                num_steps * num_assets * num_fields,
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::Shape("feature cube contains non-finite values".to_string()));
        }

        Ok(Self {
            values,
            num_steps,
            num_assets,
            num_fields,
        })
    }

    /// Simple return and log distance from a trailing moving average of `ma_span` prices.
    pub fn from_prices(prices: &PriceTable, ma_span: usize) -> Result<Self> {
        if ma_span == 0 {
            return Err(Error::Config("ma_span must be positive".to_string()));
        }

        let num_steps = prices.num_steps();
        let num_assets = prices.num_assets();
        let mut values = vec![0.0; num_steps * num_assets * PRICE_FIELDS];

        for asset in 0..num_assets {
            let series = prices.asset_prices(asset);
            let mut running = 0.0_f64;

            for step in 0..num_steps {
                running += series[step] as f64;
                if step >= ma_span {
                    running -= series[step - ma_span] as f64;
                }
                let span = (step + 1).min(ma_span) as f64;
                let average = running / span;

                let ret = if step == 0 {
                    0.0
                } else {
                    series[step] / series[step - 1] - 1.0
                };
                let offset = (step * num_assets + asset) * PRICE_FIELDS;
                values[offset] = ret;
                values[offset + 1] = (series[step] as f64 / average).ln() as f32;
            }
        }

        Self::new(values, num_steps, num_assets, PRICE_FIELDS)
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn num_assets(&self) -> usize {
        self.num_assets
    }

    pub fn num_fields(&self) -> usize {
        self.num_fields
    }

    /// Features for steps `[start, start + len)`, shaped `[len, num_assets, num_fields]`.
    pub fn slice(&self, start: usize, len: usize) -> &[f32] {
        let stride = self.num_assets * self.num_fields;
        &self.values[start * stride..(start + len) * stride]
    }
}
