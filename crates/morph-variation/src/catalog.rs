use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const BUILTIN_OUTFITS: &[&str] = &[
    "a tailored navy suit",
    "a medieval knight's armour",
    "a vintage leather aviator jacket",
    "an elegant evening gown",
    "a futuristic space suit",
    "traditional Japanese kimono",
];

const BUILTIN_PERIODS: &[&str] = &[
    "ancient Rome",
    "the Renaissance",
    "the Victorian era",
    "the roaring 1920s",
    "the 1970s",
];

const BUILTIN_STYLES: &[&str] = &[
    "cinematic lighting",
    "oil painting style",
    "watercolor style",
    "studio portrait",
];

/// Ordered variation lists, one per theme.
///
/// Loaded from a JSON file (`{"outfits": [...], "periods": [...], "styles": [...]}`).
/// Any list that is missing or empty falls back to the built-in list, so the
/// indexing rule always has something to index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeCatalog {
    #[serde(default)]
    pub outfits: Vec<String>,
    #[serde(default)]
    pub periods: Vec<String>,
    #[serde(default)]
    pub styles: Vec<String>,
}

impl ThemeCatalog {
    pub fn builtin() -> Self {
        Self {
            outfits: to_owned(BUILTIN_OUTFITS),
            periods: to_owned(BUILTIN_PERIODS),
            styles: to_owned(BUILTIN_STYLES),
        }
    }

    /// Read a catalog file; empty lists are replaced by built-ins.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading theme catalog {}", path.display()))?;
        let parsed: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing theme catalog {}", path.display()))?;
        debug!(
            outfits = parsed.outfits.len(),
            periods = parsed.periods.len(),
            styles = parsed.styles.len(),
            "theme catalog loaded"
        );
        Ok(parsed.with_builtin_gaps())
    }

    /// Like [`ThemeCatalog::load`], but an unreadable source degrades to the built-ins.
    pub fn load_or_builtin(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::builtin();
        };
        match Self::load(path) {
            Ok(catalog) => catalog,
            Err(error) => {
                warn!(%error, "theme catalog unavailable, using built-in variations");
                Self::builtin()
            }
        }
    }

    fn with_builtin_gaps(mut self) -> Self {
        if self.outfits.is_empty() {
            self.outfits = to_owned(BUILTIN_OUTFITS);
        }
        if self.periods.is_empty() {
            self.periods = to_owned(BUILTIN_PERIODS);
        }
        if self.styles.is_empty() {
            self.styles = to_owned(BUILTIN_STYLES);
        }
        self
    }
}

impl Default for ThemeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}
