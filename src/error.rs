use thiserror::Error;

/// Errors raised while configuring or training an allocator.
///
/// None of these are recoverable inside a run: they point at bad data or a bad
/// configuration and are handed back to the caller unchanged.
#[derive(Debug, Error)]
pub enum Error {
    /// Tensor, price table or configuration dimensions disagree.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// A sample window cannot produce a Sharpe ratio.
    #[error("degenerate window [{start}, {end}): {reason}")]
    DegenerateWindow {
        start: usize,
        end: usize,
        reason: String,
    },

    /// Loss or gradients stopped being finite numbers.
    #[error("non-finite {what} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss {
        what: &'static str,
        epoch: usize,
        batch: usize,
    },

    #[error("invalid price for asset {asset} at step {step}: {value}")]
    InvalidPrice { asset: usize, step: usize, value: f32 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
