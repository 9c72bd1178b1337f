use std::path::Path;
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::{Dataset, InMemDataset};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::data::batchitem::WindowBatch;
use crate::data::features::FeatureCube;
use crate::data::prices::{PriceTable, PricedWindows, Window};
use crate::error::{Error, Result};
use crate::utils::tensor_from_vec;

/// One training sample: the lookback features and the window its weights are held over.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WindowItem {
    features: Vec<f32>, // [K, A, F]
    window: Window,
}

impl WindowItem {
    pub fn new(features: Vec<f32>, window: Window) -> Self {
        Self { features, window }
    }

    pub fn window(&self) -> Window {
        self.window
    }
}

/// Feature grid shared by every item of a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowShape {
    pub lookback: usize,
    pub num_assets: usize,
    pub num_fields: usize,
}

impl WindowShape {
    pub fn item_len(&self) -> usize {
        self.lookback * self.num_assets * self.num_fields
    }
}

/// Items validated against one price table.
pub struct WindowDataset {
    items: InMemDataset<WindowItem>,
    prices: PriceTable,
    shape: WindowShape,
}

impl WindowDataset {
    pub fn new(items: Vec<WindowItem>, prices: PriceTable, shape: WindowShape) -> Result<Self> {
        if shape.num_assets != prices.num_assets() {
            return Err(Error::Shape(format!(
                "features cover {} assets, price table has {}",
                shape.num_assets,
                prices.num_assets()
            )));
        }

        for item in items.iter() {
            if item.features.len() != shape.item_len() {
                return Err(Error::Shape(format!(
                    "item for window [{}, {}) has {} feature values, expected {}",
                    item.window.start,
                    item.window.end,
                    item.features.len(),
                    shape.item_len()
                )));
            }
            Window::new(item.window.start, item.window.end)?;
            prices.check_window(&item.window)?;
        }

        Ok(Self {
            items: InMemDataset::new(items),
            prices,
            shape,
        })
    }

    /// Slides over the table: the item at step `t` sees features `[t - lookback, t)` and
    /// holds its weights over prices `[t - 1, t + horizon)`, i.e. `horizon` returns
    /// starting from the last observed price.
    pub fn from_prices(
        prices: &PriceTable,
        cube: &FeatureCube,
        lookback: usize,
        horizon: usize,
    ) -> Result<Self> {
        if lookback == 0 {
            return Err(Error::Config("lookback must be positive".to_string()));
        }
        if cube.num_steps() != prices.num_steps() || cube.num_assets() != prices.num_assets() {
            return Err(Error::Shape(format!(
                "feature cube is {}x{}, price table is {}x{} (steps x assets)",
                cube.num_steps(),
                cube.num_assets(),
                prices.num_steps(),
                prices.num_assets()
            )));
        }

        let last = prices.num_steps().saturating_sub(horizon);
        let mut items = Vec::new();
        for t in lookback..=last {
            let window = Window::new(t - 1, t + horizon)?;
            let features = cube.slice(t - lookback, lookback).to_vec();
            items.push(WindowItem::new(features, window));
        }

        let shape = WindowShape {
            lookback,
            num_assets: cube.num_assets(),
            num_fields: cube.num_fields(),
        };
        Self::new(items, prices.clone(), shape)
    }

    pub fn load_from_file<P: AsRef<Path>>(
        path: P,
        prices: PriceTable,
        shape: WindowShape,
    ) -> Result<Self> {
        let rows: InMemDataset<WindowItem> = InMemDataset::from_json_rows(path)?;
        let items = (0..rows.len()).filter_map(|idx| rows.get(idx)).collect();
        Self::new(items, prices, shape)
    }

    pub fn shape(&self) -> WindowShape {
        self.shape
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Chronological split: the first `ratio` of items train, the rest validate.
    pub fn split(self, ratio: f64) -> Result<(Self, Self)> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(Error::Config(format!("split ratio {ratio} outside [0, 1]")));
        }

        let mut items: Vec<WindowItem> =
            (0..self.items.len()).filter_map(|idx| self.items.get(idx)).collect();
        let cut = (items.len() as f64 * ratio).round() as usize;
        let tail = items.split_off(cut);

        Ok((
            Self::new(items, self.prices.clone(), self.shape)?,
            Self::new(tail, self.prices, self.shape)?,
        ))
    }

    /// In-order loader; batches keep the dataset's chronology.
    pub fn into_loader<B: Backend>(
        self,
        batch_size: usize,
        device: B::Device,
    ) -> Arc<dyn DataLoader<WindowBatch<B>>> {
        let batcher = WindowBatcher::<B>::new(device, self.prices.clone(), self.shape);
        DataLoaderBuilder::new(batcher)
            .batch_size(batch_size)
            .build(self)
    }
}

impl Dataset<WindowItem> for WindowDataset {
    fn get(&self, index: usize) -> Option<WindowItem> {
        self.items.get(index)
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

pub struct WindowBatcher<B: Backend> {
    device: B::Device,
    prices: PriceTable,
    shape: WindowShape,
}

impl<B: Backend> WindowBatcher<B> {
    pub fn new(device: B::Device, prices: PriceTable, shape: WindowShape) -> Self {
        Self {
            device,
            prices,
            shape,
        }
    }
}

impl<B: Backend> Batcher<WindowItem, WindowBatch<B>> for WindowBatcher<B> {
    fn batch(&self, items: Vec<WindowItem>) -> WindowBatch<B> {
        let batch_size = items.len();
        let WindowShape {
            lookback,
            num_assets,
            num_fields,
        } = self.shape;

        let mut values = Vec::with_capacity(batch_size * self.shape.item_len());
        let mut windows = Vec::with_capacity(batch_size);
        for item in items {
            values.extend(item.features);
            windows.push(item.window);
        }

        let features = tensor_from_vec(values, [batch_size, lookback, num_assets, num_fields])
            .to_device(&self.device);

        WindowBatch {
            features,
            windows: PricedWindows::from_validated(self.prices.clone(), windows),
        }
    }
}
