//! Facade over the morph engine.
//!
//! [`KernelBuilder`] wires the session store, the provider registry, the
//! variation engine and both orchestrators into a cheaply clonable
//! [`MorphKernel`]. Unknown sessions always surface as
//! [`MorphError::SessionNotFound`]; a known session without a run projects as
//! `idle`.

mod views;

use std::sync::Arc;

use morph_protocol::{AssetRef, MorphError, MorphResult, RunId, Session, SessionId, SourceAsset};
use morph_providers::{ProviderDescriptor, ProviderRegistry, ProviderSelection};
use morph_runtime::{BatchOrchestrator, GenerationOrchestrator, OrchestrationPolicy};
use morph_store::SessionStore;
use morph_variation::{ThemeCatalog, VariationEngine};
use tracing::{info, instrument};

pub use views::{
    BatchProgressView, BatchResult, CompletedBatch, GenerationProgress, RunStatus, SessionImage,
    SessionResult,
};

#[derive(Debug, Clone, Default)]
pub struct KernelBuilder {
    registry: ProviderRegistry,
    policy: OrchestrationPolicy,
    themes: Option<ThemeCatalog>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn policy(mut self, policy: OrchestrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn themes(mut self, themes: ThemeCatalog) -> Self {
        self.themes = Some(themes);
        self
    }

    pub fn build(self) -> MorphKernel {
        let store = SessionStore::new();
        let registry = Arc::new(self.registry);
        let policy = Arc::new(self.policy);
        let variation = VariationEngine::new(self.themes.unwrap_or_else(ThemeCatalog::builtin));

        let generation =
            GenerationOrchestrator::new(store.clone(), Arc::clone(&registry), Arc::clone(&policy));
        let batch = BatchOrchestrator::new(
            store.clone(),
            Arc::clone(&registry),
            variation,
            Arc::clone(&policy),
        );

        MorphKernel {
            store,
            registry,
            policy,
            generation,
            batch,
        }
    }
}

#[derive(Clone)]
pub struct MorphKernel {
    store: SessionStore,
    registry: Arc<ProviderRegistry>,
    policy: Arc<OrchestrationPolicy>,
    generation: GenerationOrchestrator,
    batch: BatchOrchestrator,
}

impl MorphKernel {
    pub fn policy(&self) -> &OrchestrationPolicy {
        &self.policy
    }

    pub fn providers(&self) -> Vec<ProviderDescriptor> {
        self.registry.describe()
    }

    /// Open a session over an image that is already stored.
    #[instrument(skip(self, original_name))]
    pub fn create_session(
        &self,
        asset_ref: AssetRef,
        original_name: Option<String>,
    ) -> MorphResult<Session> {
        if asset_ref.as_str().trim().is_empty() {
            return Err(MorphError::EmptySourceAsset);
        }
        Ok(self.store.create(SourceAsset::new(asset_ref, original_name)))
    }

    pub fn session_image(&self, session_id: &SessionId) -> MorphResult<SessionImage> {
        self.store.read(session_id, SessionImage::project)
    }

    #[instrument(skip(self, prompt), fields(session_id = %session_id))]
    pub fn start_generation(
        &self,
        session_id: &SessionId,
        prompt: &str,
        provider: Option<&str>,
    ) -> MorphResult<RunId> {
        self.generation
            .start(session_id, prompt, &ProviderSelection::parse(provider))
    }

    #[instrument(skip(self, prompt), fields(session_id = %session_id))]
    pub fn start_batch(
        &self,
        session_id: &SessionId,
        prompt: &str,
        provider: Option<&str>,
        iterations: u32,
    ) -> MorphResult<RunId> {
        self.batch.start(
            session_id,
            prompt,
            &ProviderSelection::parse(provider),
            iterations,
        )
    }

    pub fn progress(&self, session_id: &SessionId) -> MorphResult<GenerationProgress> {
        self.store.read(session_id, GenerationProgress::project)
    }

    pub fn batch_progress(&self, session_id: &SessionId) -> MorphResult<BatchProgressView> {
        self.store.read(session_id, BatchProgressView::project)
    }

    pub fn result(&self, session_id: &SessionId) -> MorphResult<SessionResult> {
        self.store.read(session_id, SessionResult::project)
    }

    /// Drop the session and abort whatever run it still owns.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn delete_session(&self, session_id: &SessionId) -> MorphResult<()> {
        if self.store.remove(session_id).is_none() {
            return Err(MorphError::SessionNotFound(session_id.clone()));
        }
        info!("session deleted");
        Ok(())
    }

    /// Completed batches, newest first.
    pub fn completed_batches(&self) -> Vec<CompletedBatch> {
        let mut batches: Vec<CompletedBatch> = self
            .store
            .snapshots()
            .iter()
            .filter_map(CompletedBatch::project)
            .collect();
        batches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        batches
    }
}
