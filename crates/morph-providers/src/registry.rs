use std::sync::Arc;

use indexmap::IndexMap;
use morph_protocol::{MorphError, MorphResult, ProviderKind, ProviderName};
use serde::Serialize;

use crate::adapter::ProviderAdapter;

/// Which providers a request targets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProviderSelection {
    /// Every configured provider, in registration order.
    #[default]
    All,
    One(ProviderName),
}

impl ProviderSelection {
    /// `None`, `"both"`, `"all"` and `"*"` select every configured provider.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::All,
            Some(value) if matches!(value.to_ascii_lowercase().as_str(), "both" | "all" | "*") => {
                Self::All
            }
            Some(value) => Self::One(ProviderName::new(value.to_ascii_lowercase())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub name: ProviderName,
    pub kind: ProviderKind,
    pub enabled: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    adapters: IndexMap<ProviderName, Arc<ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering an existing name replaces the adapter but keeps its position.
    pub fn register(&mut self, adapter: ProviderAdapter) -> &mut Self {
        self.adapters
            .insert(adapter.name().clone(), Arc::new(adapter));
        self
    }

    pub fn get(&self, name: &ProviderName) -> Option<Arc<ProviderAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<ProviderName> {
        self.adapters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Resolve a selection to the adapters a run fans out to.
    ///
    /// The wildcard expands to enabled adapters only. Naming a disabled
    /// provider explicitly still resolves it, so the caller sees its
    /// `Disabled` failure in the results.
    pub fn resolve(&self, selection: &ProviderSelection) -> MorphResult<Vec<Arc<ProviderAdapter>>> {
        match selection {
            ProviderSelection::All => {
                let enabled: Vec<_> = self
                    .adapters
                    .values()
                    .filter(|adapter| adapter.is_enabled())
                    .cloned()
                    .collect();
                if enabled.is_empty() {
                    return Err(MorphError::NoProvidersConfigured);
                }
                Ok(enabled)
            }
            ProviderSelection::One(name) => self
                .get(name)
                .map(|adapter| vec![adapter])
                .ok_or_else(|| MorphError::UnknownProvider(name.to_string())),
        }
    }

    pub fn describe(&self) -> Vec<ProviderDescriptor> {
        self.adapters
            .values()
            .map(|adapter| ProviderDescriptor {
                name: adapter.name().clone(),
                kind: adapter.profile().kind,
                enabled: adapter.is_enabled(),
                timeout_secs: adapter.profile().timeout.as_secs(),
            })
            .collect()
    }
}
