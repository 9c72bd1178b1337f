use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Shortest window able to produce two returns.
pub const MIN_WINDOW_STEPS: usize = 3;

/// Read-only asset price levels, laid out asset-major: `[num_assets, num_steps]`.
///
/// Cloning shares the underlying buffer, so one table can back every batch of a run.
#[derive(Clone, Debug)]
pub struct PriceTable {
    values: Arc<Vec<f32>>,
    num_assets: usize,
    num_steps: usize,
}

impl PriceTable {
    pub fn new(values: Vec<f32>, num_assets: usize, num_steps: usize) -> Result<Self> {
        if num_assets == 0 || num_steps == 0 {
            return Err(Error::Shape(format!(
                "price table needs at least one asset and one step, got {num_assets}x{num_steps}"
            )));
        }
        if values.len() != num_assets * num_steps {
            return Err(Error::Shape(format!(
                "price table of {num_assets}x{num_steps} needs {} values, got {}",
                num_assets * num_steps,
                values.len()
            )));
        }

        for (idx, &value) in values.iter().enumerate() {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidPrice {
                    asset: idx / num_steps,
                    step: idx % num_steps,
                    value,
                });
            }
        }

        Ok(Self {
            values: Arc::new(values),
            num_assets,
            num_steps,
        })
    }

    /// Builds a table from one price series per asset.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let num_assets = rows.len();
        let num_steps = rows.first().map(|row| row.len()).unwrap_or(0);

        if let Some((asset, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != num_steps) {
            return Err(Error::Shape(format!(
                "asset {asset} has {} prices, expected {num_steps}",
                row.len()
            )));
        }

        Self::new(rows.into_iter().flatten().collect(), num_assets, num_steps)
    }

    /// Loads a JSON array of per-asset price rows.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let rows: Vec<Vec<f32>> = serde_json::from_reader(reader)?;
        Self::from_rows(rows)
    }

    pub fn num_assets(&self) -> usize {
        self.num_assets
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn price(&self, asset: usize, step: usize) -> f32 {
        self.values[asset * self.num_steps + step]
    }

    pub fn asset_prices(&self, asset: usize) -> &[f32] {
        let start = asset * self.num_steps;
        &self.values[start..start + self.num_steps]
    }

    /// True when both handles share the same buffer.
    pub fn same_table(&self, other: &PriceTable) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }

    pub fn check_window(&self, window: &Window) -> Result<()> {
        if window.end > self.num_steps {
            return Err(Error::Shape(format!(
                "window [{}, {}) runs past the {} available price steps",
                window.start, window.end, self.num_steps
            )));
        }
        Ok(())
    }

    /// Prices of `window` in time-major order, `[window.len(), num_assets]`.
    pub fn window_matrix(&self, window: &Window) -> Vec<f32> {
        let mut out = Vec::with_capacity(window.len() * self.num_assets);
        for step in window.start..window.end {
            for asset in 0..self.num_assets {
                out.push(self.price(asset, step));
            }
        }
        out
    }
}

/// Half-open span `[start, end)` of absolute price steps a sample's weights apply to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

impl Window {
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if end < start + MIN_WINDOW_STEPS {
            return Err(Error::DegenerateWindow {
                start,
                end,
                reason: format!("need at least {MIN_WINDOW_STEPS} prices for two returns"),
            });
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A batch of windows bound to the price table they index into.
#[derive(Clone, Debug)]
pub struct PricedWindows {
    prices: PriceTable,
    windows: Vec<Window>,
}

impl PricedWindows {
    pub fn new(prices: PriceTable, windows: Vec<Window>) -> Result<Self> {
        for window in windows.iter() {
            Window::new(window.start, window.end)?;
            prices.check_window(window)?;
        }
        Ok(Self { prices, windows })
    }

    /// For windows already checked against `prices`.
    pub(crate) fn from_validated(prices: PriceTable, windows: Vec<Window>) -> Self {
        Self { prices, windows }
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
