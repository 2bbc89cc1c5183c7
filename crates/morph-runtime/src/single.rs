use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::join_all;
use morph_protocol::{
    AssetRef, GenerationRequest, GenerationRun, MorphError, MorphResult, ProviderName,
    ProviderStatus, RunId, Session, SessionId,
};
use morph_providers::{ProviderAdapter, ProviderRegistry, ProviderSelection};
use morph_store::SessionStore;
use morph_variation::generation_label;
use tracing::{debug, info, instrument, warn};

use crate::config::OrchestrationPolicy;
use crate::normalize_prompt;
use crate::supervise::spawn_supervised;

#[derive(Clone)]
pub struct GenerationOrchestrator {
    store: SessionStore,
    registry: Arc<ProviderRegistry>,
    policy: Arc<OrchestrationPolicy>,
}

/// The run `run_id` if it is still the session's current run.
fn current_run<'a>(session: &'a mut Session, run_id: &RunId) -> Option<&'a mut GenerationRun> {
    session
        .generation
        .as_mut()
        .filter(|run| &run.run_id == run_id)
}

impl GenerationOrchestrator {
    pub fn new(
        store: SessionStore,
        registry: Arc<ProviderRegistry>,
        policy: Arc<OrchestrationPolicy>,
    ) -> Self {
        Self {
            store,
            registry,
            policy,
        }
    }

    /// Validate, open a new run and return its id; providers are called in the background.
    #[instrument(skip(self, prompt), fields(session_id = %session_id))]
    pub fn start(
        &self,
        session_id: &SessionId,
        prompt: &str,
        selection: &ProviderSelection,
    ) -> MorphResult<RunId> {
        let prompt = normalize_prompt(prompt)?;
        let adapters = self.registry.resolve(selection)?;
        let providers: Vec<ProviderName> = adapters.iter().map(|a| a.name().clone()).collect();

        let (run_id, source) = self.store.try_update(session_id, |session| {
            if session.is_busy() {
                return Err(MorphError::AlreadyGenerating(session.id.clone()));
            }
            let run = GenerationRun::start(prompt.clone(), &providers);
            let run_id = run.run_id.clone();
            session.generation = Some(run);
            Ok((run_id, session.source.asset_ref.clone()))
        })?;
        info!(run_id = %run_id, providers = ?providers, "generation started");

        let run = RunContext {
            store: self.store.clone(),
            session_id: session_id.clone(),
            run_id: run_id.clone(),
            prompt,
            source,
        };
        let deadline = self.policy.generation_deadline;
        let supervised = async move {
            let work = AssertUnwindSafe(run.drive(&adapters)).catch_unwind();
            match tokio::time::timeout(deadline, work).await {
                Ok(Ok(())) => run.settle(|generation| generation.complete()),
                Ok(Err(_panic)) => {
                    run.settle(|generation| generation.fail("generation task crashed"))
                }
                Err(_) => run.settle(|generation| {
                    generation.fail(format!("generation exceeded deadline of {deadline:?}"))
                }),
            }
        };
        spawn_supervised(&self.store, session_id, &run_id, supervised)?;
        Ok(run_id)
    }
}

struct RunContext {
    store: SessionStore,
    session_id: SessionId,
    run_id: RunId,
    prompt: String,
    source: AssetRef,
}

impl RunContext {
    async fn drive(&self, adapters: &[Arc<ProviderAdapter>]) {
        join_all(adapters.iter().map(|adapter| self.call(adapter))).await;
    }

    async fn call(&self, adapter: &ProviderAdapter) {
        let provider = adapter.name();
        self.with_run(|run| run.mark_provider(provider, ProviderStatus::Generating));

        let request = GenerationRequest {
            session_id: self.session_id.clone(),
            prompt: self.prompt.clone(),
            source: self.source.clone(),
            asset_label: generation_label(provider.as_str()),
            variation: None,
        };
        let outcome = adapter.generate(&request).await;
        debug!(provider = %provider, success = outcome.is_success(), "provider settled");
        self.with_run(|run| run.record_outcome(outcome));
    }

    /// Apply a provider-level write to the current run, if it still exists.
    fn with_run(&self, write: impl FnOnce(&mut GenerationRun) -> MorphResult<bool>) {
        let applied = self.store.update(&self.session_id, |session| {
            current_run(session, &self.run_id).map(write)
        });
        match applied {
            Ok(Some(Err(error))) => {
                warn!(session_id = %self.session_id, run_id = %self.run_id, %error, "rejected run update");
            }
            Ok(None) | Err(_) => {
                debug!(session_id = %self.session_id, run_id = %self.run_id, "run no longer current");
            }
            Ok(Some(Ok(_))) => {}
        }
    }

    fn settle(&self, finish: impl FnOnce(&mut GenerationRun) -> bool) {
        let settled = self.store.update(&self.session_id, |session| {
            current_run(session, &self.run_id).map(|run| (finish(run), run.state))
        });
        if let Ok(Some((true, state))) = settled {
            info!(session_id = %self.session_id, run_id = %self.run_id, state = ?state, "generation settled");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{adapter, source, wait_for};
    use anyhow::Result;
    use morph_protocol::{FailureKind, GenerationState, ProviderOutcome};
    use morph_providers::{SimulatedBehavior, SimulatedFailure};

    fn orchestrator(
        adapters: Vec<ProviderAdapter>,
        policy: OrchestrationPolicy,
    ) -> (SessionStore, GenerationOrchestrator) {
        let mut registry = ProviderRegistry::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        let store = SessionStore::new();
        let orchestrator =
            GenerationOrchestrator::new(store.clone(), Arc::new(registry), Arc::new(policy));
        (store, orchestrator)
    }

    async fn settled_run(store: &SessionStore, session_id: &SessionId) -> Result<GenerationRun> {
        let session = wait_for(store, session_id, |s| s.generation_state().is_terminal()).await?;
        session
            .generation
            .ok_or_else(|| anyhow::anyhow!("no generation run recorded"))
    }

    #[tokio::test]
    async fn one_failing_provider_does_not_block_its_sibling() -> Result<()> {
        let (store, orchestrator) = orchestrator(
            vec![
                adapter("alpha", SimulatedBehavior::Fail(SimulatedFailure::Auth)).0,
                adapter("beta", SimulatedBehavior::Succeed).0,
            ],
            OrchestrationPolicy::default(),
        );
        let session = store.create(source());
        orchestrator.start(&session.id, "a portrait", &ProviderSelection::parse(Some("both")))?;

        let run = settled_run(&store, &session.id).await?;
        assert_eq!(run.state, GenerationState::Completed);
        assert_eq!(run.providers["alpha"], ProviderStatus::Error);
        assert_eq!(run.providers["beta"], ProviderStatus::Completed);
        match &run.results["alpha"] {
            ProviderOutcome::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::Auth);
                assert!(failure.message.starts_with("alpha: "));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(run.results["beta"].is_success());
        Ok(())
    }

    #[tokio::test]
    async fn run_completes_even_when_every_provider_fails() -> Result<()> {
        let (store, orchestrator) = orchestrator(
            vec![
                adapter("alpha", SimulatedBehavior::Fail(SimulatedFailure::RateLimited)).0,
                adapter("beta", SimulatedBehavior::Panic).0,
            ],
            OrchestrationPolicy::default(),
        );
        let session = store.create(source());
        orchestrator.start(&session.id, "a portrait", &ProviderSelection::All)?;

        let run = settled_run(&store, &session.id).await?;
        assert_eq!(run.state, GenerationState::Completed);
        assert!(run.providers.values().all(|s| *s == ProviderStatus::Error));
        assert_eq!(run.results.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn single_provider_selection_keeps_keys_fixed() -> Result<()> {
        let (store, orchestrator) = orchestrator(
            vec![
                adapter("alpha", SimulatedBehavior::Succeed).0,
                adapter("beta", SimulatedBehavior::Succeed).0,
            ],
            OrchestrationPolicy::default(),
        );
        let session = store.create(source());
        orchestrator.start(&session.id, "a portrait", &ProviderSelection::One("beta".into()))?;

        let run = settled_run(&store, &session.id).await?;
        let keys: Vec<&str> = run.providers.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, ["beta"]);
        assert_eq!(run.results.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn validation_errors_leave_session_untouched() -> Result<()> {
        let (store, orchestrator) = orchestrator(
            vec![adapter("alpha", SimulatedBehavior::Succeed).0],
            OrchestrationPolicy::default(),
        );
        let session = store.create(source());

        let error = orchestrator
            .start(&session.id, "   ", &ProviderSelection::All)
            .unwrap_err();
        assert!(matches!(error, MorphError::EmptyPrompt));
        let error = orchestrator
            .start(&session.id, "p", &ProviderSelection::One("nope".into()))
            .unwrap_err();
        assert!(matches!(error, MorphError::UnknownProvider(_)));
        let error = orchestrator
            .start(&SessionId::new("missing"), "p", &ProviderSelection::All)
            .unwrap_err();
        assert!(matches!(error, MorphError::SessionNotFound(_)));

        assert_eq!(store.get(&session.id), Some(session));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_request_is_rejected_while_generating() -> Result<()> {
        let (store, orchestrator) = orchestrator(
            vec![adapter("alpha", SimulatedBehavior::Hang).0],
            OrchestrationPolicy::default(),
        );
        let session = store.create(source());
        let first = orchestrator.start(&session.id, "p", &ProviderSelection::All)?;

        let error = orchestrator
            .start(&session.id, "p", &ProviderSelection::All)
            .unwrap_err();
        assert!(matches!(error, MorphError::AlreadyGenerating(_)));
        let current = store.read(&session.id, |s| s.generation.as_ref().map(|r| r.run_id.clone()))?;
        assert_eq!(current, Some(first));

        store.remove(&session.id);
        Ok(())
    }

    #[tokio::test]
    async fn watchdog_forces_error_and_settles_providers() -> Result<()> {
        let (store, orchestrator) = orchestrator(
            vec![
                adapter("alpha", SimulatedBehavior::Hang).0,
                adapter("beta", SimulatedBehavior::Succeed).0,
            ],
            OrchestrationPolicy {
                generation_deadline: Duration::from_millis(100),
                ..OrchestrationPolicy::default()
            },
        );
        let session = store.create(source());
        orchestrator.start(&session.id, "p", &ProviderSelection::All)?;

        let run = settled_run(&store, &session.id).await?;
        assert_eq!(run.state, GenerationState::Error);
        assert_eq!(
            run.error.as_deref(),
            Some("generation exceeded deadline of 100ms")
        );
        assert_eq!(run.providers["alpha"], ProviderStatus::Error);
        assert_eq!(run.providers["beta"], ProviderStatus::Completed);
        assert!(run.providers.values().all(|s| s.is_terminal()));
        Ok(())
    }

    #[tokio::test]
    async fn finished_session_accepts_a_fresh_run() -> Result<()> {
        let (store, orchestrator) = orchestrator(
            vec![adapter("alpha", SimulatedBehavior::Succeed).0],
            OrchestrationPolicy::default(),
        );
        let session = store.create(source());
        let first = orchestrator.start(&session.id, "first", &ProviderSelection::All)?;
        settled_run(&store, &session.id).await?;

        let second = orchestrator.start(&session.id, "second", &ProviderSelection::All)?;
        assert_ne!(first, second);
        let run = settled_run(&store, &session.id).await?;
        assert_eq!(run.run_id, second);
        assert_eq!(run.prompt, "second");
        Ok(())
    }

    #[tokio::test]
    async fn task_handle_is_released_after_settling() -> Result<()> {
        let (store, orchestrator) = orchestrator(
            vec![adapter("alpha", SimulatedBehavior::Succeed).0],
            OrchestrationPolicy::default(),
        );
        let session = store.create(source());
        orchestrator.start(&session.id, "p", &ProviderSelection::All)?;
        settled_run(&store, &session.id).await?;

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.has_task(&session.id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        Ok(())
    }
}
