//! Provider outcomes.
//!
//! A provider call always resolves to exactly one of `Success` or `Failure`.
//! On the wire the outcome is a flat object discriminated by a boolean
//! `success` field, which is what polling clients switch on.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ids::{AssetRef, ProviderName};

/// Monetary cost of one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub total: f64,
    pub currency: String,
}

impl Cost {
    pub fn usd(input: f64, output: f64) -> Self {
        Self {
            input,
            output,
            total: input + output,
            currency: "USD".to_owned(),
        }
    }

    pub fn free() -> Self {
        Self::usd(0.0, 0.0)
    }
}

impl Default for Cost {
    fn default() -> Self {
        Self::free()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Auth,
    RateLimited,
    Timeout,
    InvalidResponse,
    Disabled,
    Transport,
    /// The call did not settle normally (panic inside the adapter, aborted run).
    Internal,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedAsset {
    pub provider: ProviderName,
    pub asset_ref: AssetRef,
    pub cost: Cost,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailure {
    pub provider: ProviderName,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "OutcomeWire", try_from = "OutcomeWire")]
pub enum ProviderOutcome {
    Success(GeneratedAsset),
    Failure(ProviderFailure),
}

impl ProviderOutcome {
    pub fn failure(provider: ProviderName, kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure(ProviderFailure {
            provider,
            kind,
            message: message.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn provider(&self) -> &ProviderName {
        match self {
            Self::Success(asset) => &asset.provider,
            Self::Failure(failure) => &failure.provider,
        }
    }

    pub fn asset_ref(&self) -> Option<&AssetRef> {
        match self {
            Self::Success(asset) => Some(&asset.asset_ref),
            Self::Failure(_) => None,
        }
    }

    pub fn cost(&self) -> Option<&Cost> {
        match self {
            Self::Success(asset) => Some(&asset.cost),
            Self::Failure(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(&failure.message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutcomeWire {
    success: bool,
    provider: ProviderName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    asset_ref: Option<AssetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cost: Option<Cost>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    processing_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<IndexMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_kind: Option<FailureKind>,
}

impl From<ProviderOutcome> for OutcomeWire {
    fn from(outcome: ProviderOutcome) -> Self {
        match outcome {
            ProviderOutcome::Success(asset) => Self {
                success: true,
                provider: asset.provider,
                asset_ref: Some(asset.asset_ref),
                cost: Some(asset.cost),
                processing_time_ms: Some(asset.processing_time_ms),
                metadata: Some(asset.metadata),
                generated_at: Some(asset.generated_at),
                error: None,
                error_kind: None,
            },
            ProviderOutcome::Failure(failure) => Self {
                success: false,
                provider: failure.provider,
                asset_ref: None,
                cost: None,
                processing_time_ms: None,
                metadata: None,
                generated_at: None,
                error: Some(failure.message),
                error_kind: Some(failure.kind),
            },
        }
    }
}

impl TryFrom<OutcomeWire> for ProviderOutcome {
    type Error = String;

    fn try_from(wire: OutcomeWire) -> Result<Self, Self::Error> {
        if wire.success {
            let asset_ref = wire
                .asset_ref
                .ok_or_else(|| "successful outcome is missing assetRef".to_owned())?;
            Ok(Self::Success(GeneratedAsset {
                provider: wire.provider,
                asset_ref,
                cost: wire.cost.unwrap_or_default(),
                processing_time_ms: wire.processing_time_ms.unwrap_or(0),
                metadata: wire.metadata.unwrap_or_default(),
                generated_at: wire.generated_at.unwrap_or_else(Utc::now),
            }))
        } else {
            Ok(Self::Failure(ProviderFailure {
                provider: wire.provider,
                kind: wire.error_kind.unwrap_or(FailureKind::Internal),
                message: wire.error.unwrap_or_else(|| "unknown error".to_owned()),
            }))
        }
    }
}
