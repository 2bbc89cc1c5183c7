//! Prompt variation for batch generation.
//!
//! Iteration `i` of a batch always maps to the same variant of the base prompt:
//! the theme is chosen by keyword matching on the base prompt and the variant
//! is `list[(i - 1) % list.len()]`. Nothing here is random except the
//! uniqueness suffix appended to asset labels.

mod catalog;
mod engine;

pub use catalog::ThemeCatalog;
pub use engine::{Theme, Variant, VariationEngine, generation_label, slugify};
