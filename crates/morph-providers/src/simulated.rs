//! In-process provider used by `--simulate` and by the test suites.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use morph_protocol::{
    AssetRef, GeneratedImage, GenerationRequest, ImageProvider, ProviderError, ProviderKind,
};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFailure {
    Auth,
    RateLimited,
    InvalidResponse,
    Transport,
}

impl SimulatedFailure {
    fn error(self) -> ProviderError {
        match self {
            Self::Auth => ProviderError::Auth("simulated key rejected".into()),
            Self::RateLimited => ProviderError::RateLimited("simulated quota exhausted".into()),
            Self::InvalidResponse => ProviderError::InvalidResponse("simulated empty body".into()),
            Self::Transport => ProviderError::Transport("simulated connection reset".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedBehavior {
    Succeed,
    Fail(SimulatedFailure),
    /// Never returns; only the adapter timeout or an abort ends the call.
    Hang,
    /// Parks the worker thread without yielding, so adapter timeouts cannot fire.
    Block(Duration),
    Panic,
}

#[derive(Debug)]
pub struct SimulatedProvider {
    behavior: SimulatedBehavior,
    kind: ProviderKind,
    latency: Duration,
    fail_iterations: BTreeSet<u32>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimulatedProvider {
    pub fn new(behavior: SimulatedBehavior) -> Self {
        Self {
            behavior,
            kind: ProviderKind::ImageConditioned,
            latency: Duration::ZERO,
            fail_iterations: BTreeSet::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Batch iterations that fail with a transport error regardless of behavior.
    pub fn failing_iterations(mut self, iterations: impl IntoIterator<Item = u32>) -> Self {
        self.fail_iterations.extend(iterations);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for SimulatedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let iteration = request.variation.as_ref().map(|v| v.iteration);
        if iteration.is_some_and(|i| self.fail_iterations.contains(&i)) {
            return Err(SimulatedFailure::Transport.error());
        }

        match self.behavior {
            SimulatedBehavior::Succeed => {
                let mut metadata = IndexMap::new();
                metadata.insert("simulated".to_owned(), json!(true));
                metadata.insert("prompt".to_owned(), json!(request.prompt));
                Ok(GeneratedImage {
                    asset_ref: AssetRef::new(format!("/generated/{}.png", request.asset_label)),
                    metadata,
                })
            }
            SimulatedBehavior::Fail(failure) => Err(failure.error()),
            SimulatedBehavior::Hang => std::future::pending().await,
            SimulatedBehavior::Block(duration) => {
                std::thread::sleep(duration);
                Err(ProviderError::Transport("simulated provider unblocked".into()))
            }
            SimulatedBehavior::Panic => panic!("simulated provider crash"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_protocol::{SessionId, VariationContext};

    fn request(iteration: Option<u32>) -> GenerationRequest {
        GenerationRequest {
            session_id: SessionId::new("s"),
            prompt: "p".into(),
            source: AssetRef::from("a"),
            asset_label: "sim-1".into(),
            variation: iteration.map(|iteration| VariationContext {
                base_prompt: "p".into(),
                iteration,
            }),
        }
    }

    #[tokio::test]
    async fn failing_iterations_override_success() {
        let provider = SimulatedProvider::new(SimulatedBehavior::Succeed).failing_iterations([2]);
        assert!(provider.generate(&request(Some(1))).await.is_ok());
        assert!(provider.generate(&request(Some(2))).await.is_err());
        assert_eq!(provider.calls(), 2);
        assert_eq!(provider.in_flight(), 0);
    }

    #[tokio::test]
    async fn peak_tracks_concurrent_calls() {
        let provider = SimulatedProvider::new(SimulatedBehavior::Succeed)
            .with_latency(Duration::from_millis(20));
        let req = request(None);
        let calls = (0..4).map(|_| provider.generate(&req));
        futures_util::future::join_all(calls).await;
        assert_eq!(provider.peak_in_flight(), 4);
    }
}
