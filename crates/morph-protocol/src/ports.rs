//! Provider port.
//!
//! [`ImageProvider`] is the only boundary between the orchestration engine and
//! vendor glue. Implementations may return any [`ProviderError`]; the adapter
//! layer in `morph-providers` adds timeouts, cost accounting and the
//! error-to-outcome conversion, so the orchestrators never see a raw error.
//!
//! Object-safety note: the trait uses `async-trait` for dyn dispatch.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::ids::{AssetRef, SessionId};

/// Whether a provider conditions on the uploaded photo or ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    ImageConditioned,
    TextToImage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationContext {
    pub base_prompt: String,
    pub iteration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub session_id: SessionId,
    pub prompt: String,
    pub source: AssetRef,
    /// Collision-free label the provider should use when storing its output.
    pub asset_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<VariationContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub asset_ref: AssetRef,
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Must be safe to call concurrently; implementations hold only read-only config.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, ProviderError>;
}
