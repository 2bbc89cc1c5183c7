use morph_protocol::Cost;
use serde::{Deserialize, Serialize};

/// Deterministic cost model of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PricingModel {
    /// Local inference or an unpriced vendor.
    #[default]
    Free,
    /// Flat USD amounts charged per generated image.
    PerImage { input_usd: f64, output_usd: f64 },
}

impl PricingModel {
    pub fn per_image(input_usd: f64, output_usd: f64) -> Self {
        Self::PerImage {
            input_usd,
            output_usd,
        }
    }

    pub fn estimate(&self) -> Cost {
        match *self {
            Self::Free => Cost::free(),
            Self::PerImage {
                input_usd,
                output_usd,
            } => Cost::usd(input_usd, output_usd),
        }
    }
}
