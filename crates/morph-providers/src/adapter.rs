use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::FutureExt;
use morph_protocol::{
    FailureKind, GeneratedAsset, GenerationRequest, ImageProvider, ProviderError, ProviderKind,
    ProviderName, ProviderOutcome,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::pricing::PricingModel;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderProfile {
    pub name: ProviderName,
    pub kind: ProviderKind,
    pub pricing: PricingModel,
    pub timeout: Duration,
}

impl ProviderProfile {
    pub fn new(name: impl Into<ProviderName>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            pricing: PricingModel::Free,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn pricing(mut self, pricing: PricingModel) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Uniform, always-resolving wrapper around one provider.
#[derive(Clone)]
pub struct ProviderAdapter {
    profile: ProviderProfile,
    provider: Option<Arc<dyn ImageProvider>>,
}

impl std::fmt::Debug for ProviderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAdapter")
            .field("profile", &self.profile)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl ProviderAdapter {
    pub fn new(profile: ProviderProfile, provider: Arc<dyn ImageProvider>) -> Self {
        Self {
            profile,
            provider: Some(provider),
        }
    }

    /// An adapter with no backing provider; every call yields a `Disabled` failure.
    pub fn disabled(profile: ProviderProfile) -> Self {
        Self {
            profile,
            provider: None,
        }
    }

    pub fn name(&self) -> &ProviderName {
        &self.profile.name
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn cost_estimate(&self) -> morph_protocol::Cost {
        self.profile.pricing.estimate()
    }

    #[instrument(
        skip(self, request),
        fields(
            provider = %self.profile.name,
            session_id = %request.session_id,
            iteration = request.variation.as_ref().map(|v| v.iteration)
        )
    )]
    pub async fn generate(&self, request: &GenerationRequest) -> ProviderOutcome {
        let Some(provider) = &self.provider else {
            debug!("provider disabled, skipping call");
            return self.failure(ProviderError::Disabled);
        };

        let started = Instant::now();
        let call = AssertUnwindSafe(provider.generate(request)).catch_unwind();
        let result = match tokio::time::timeout(self.profile.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => {
                warn!("provider panicked during generation");
                return ProviderOutcome::failure(
                    self.profile.name.clone(),
                    FailureKind::Internal,
                    format!("{}: provider crashed during generation", self.profile.name),
                );
            }
            Err(_) => Err(ProviderError::Timeout {
                after: self.profile.timeout,
            }),
        };
        let processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(image) => {
                let mut metadata = image.metadata;
                metadata
                    .entry("kind".to_owned())
                    .or_insert_with(|| json!(self.profile.kind));
                debug!(processing_time_ms, asset = %image.asset_ref, "provider call succeeded");
                ProviderOutcome::Success(GeneratedAsset {
                    provider: self.profile.name.clone(),
                    asset_ref: image.asset_ref,
                    cost: self.profile.pricing.estimate(),
                    processing_time_ms,
                    metadata,
                    generated_at: Utc::now(),
                })
            }
            Err(error) => {
                warn!(%error, retryable = error.is_retryable(), processing_time_ms, "provider call failed");
                self.failure(error)
            }
        }
    }

    fn failure(&self, error: ProviderError) -> ProviderOutcome {
        ProviderOutcome::failure(
            self.profile.name.clone(),
            error.kind(),
            format!("{}: {error}", self.profile.name),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedBehavior, SimulatedFailure, SimulatedProvider};
    use morph_protocol::{AssetRef, SessionId};

    fn request() -> GenerationRequest {
        GenerationRequest {
            session_id: SessionId::new("s1"),
            prompt: "a portrait".into(),
            source: AssetRef::from("uploads/me.jpg"),
            asset_label: "gemini-1".into(),
            variation: None,
        }
    }

    fn profile(timeout: Duration) -> ProviderProfile {
        ProviderProfile::new("gemini", ProviderKind::ImageConditioned)
            .pricing(PricingModel::per_image(0.30, 0.039))
            .timeout(timeout)
    }

    #[tokio::test]
    async fn success_is_priced_and_timed() {
        let adapter = ProviderAdapter::new(
            profile(Duration::from_secs(5)),
            Arc::new(SimulatedProvider::new(SimulatedBehavior::Succeed)),
        );
        let outcome = adapter.generate(&request()).await;
        let ProviderOutcome::Success(asset) = outcome else {
            panic!("expected success");
        };
        assert_eq!(asset.provider.as_str(), "gemini");
        assert_eq!(asset.asset_ref.as_str(), "/generated/gemini-1.png");
        assert_eq!(asset.cost, adapter.cost_estimate());
        assert_eq!(asset.metadata["kind"], json!("image_conditioned"));
    }

    #[tokio::test]
    async fn disabled_adapter_short_circuits() {
        let adapter = ProviderAdapter::disabled(profile(Duration::from_secs(5)));
        let outcome = adapter.generate(&request()).await;
        let ProviderOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::Disabled);
        assert_eq!(failure.message, "gemini: provider not configured");
    }

    #[tokio::test]
    async fn vendor_error_becomes_prefixed_failure() {
        let adapter = ProviderAdapter::new(
            profile(Duration::from_secs(5)),
            Arc::new(SimulatedProvider::new(SimulatedBehavior::Fail(
                SimulatedFailure::Auth,
            ))),
        );
        let outcome = adapter.generate(&request()).await;
        let ProviderOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::Auth);
        assert!(failure.message.starts_with("gemini: invalid credentials"));
    }

    #[tokio::test]
    async fn hung_provider_times_out() {
        let adapter = ProviderAdapter::new(
            profile(Duration::from_millis(50)),
            Arc::new(SimulatedProvider::new(SimulatedBehavior::Hang)),
        );
        let outcome = adapter.generate(&request()).await;
        let ProviderOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.kind.is_retryable());
    }

    #[tokio::test]
    async fn panicking_provider_is_contained() {
        let adapter = ProviderAdapter::new(
            profile(Duration::from_secs(5)),
            Arc::new(SimulatedProvider::new(SimulatedBehavior::Panic)),
        );
        let outcome = adapter.generate(&request()).await;
        let ProviderOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::Internal);
    }
}
