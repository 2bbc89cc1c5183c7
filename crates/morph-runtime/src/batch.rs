use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use morph_protocol::{
    AssetRef, BatchState, GenerationRequest, IterationOutcome, MorphError, MorphResult,
    ProviderName, RunId, Session, SessionId, VariationContext,
};
use morph_providers::{ProviderAdapter, ProviderRegistry, ProviderSelection};
use morph_store::SessionStore;
use morph_variation::VariationEngine;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::config::OrchestrationPolicy;
use crate::fanout::fan_out;
use crate::normalize_prompt;
use crate::supervise::spawn_supervised;

#[derive(Clone)]
pub struct BatchOrchestrator {
    store: SessionStore,
    registry: Arc<ProviderRegistry>,
    variation: VariationEngine,
    policy: Arc<OrchestrationPolicy>,
}

fn current_batch<'a>(session: &'a mut Session, run_id: &RunId) -> Option<&'a mut BatchState> {
    session
        .batch
        .as_mut()
        .filter(|batch| &batch.run_id == run_id)
}

impl BatchOrchestrator {
    pub fn new(
        store: SessionStore,
        registry: Arc<ProviderRegistry>,
        variation: VariationEngine,
        policy: Arc<OrchestrationPolicy>,
    ) -> Self {
        Self {
            store,
            registry,
            variation,
            policy,
        }
    }

    #[instrument(skip(self, base_prompt), fields(session_id = %session_id))]
    pub fn start(
        &self,
        session_id: &SessionId,
        base_prompt: &str,
        selection: &ProviderSelection,
        iterations: u32,
    ) -> MorphResult<RunId> {
        let max = self.policy.max_iterations;
        if !(1..=max).contains(&iterations) {
            return Err(MorphError::InvalidIterations {
                requested: iterations,
                min: 1,
                max,
            });
        }
        let base_prompt = normalize_prompt(base_prompt)?;
        let adapters = self.registry.resolve(selection)?;
        let providers: Vec<ProviderName> = adapters.iter().map(|a| a.name().clone()).collect();

        let (run_id, source) = self.store.try_update(session_id, |session| {
            if session.is_busy() {
                return Err(MorphError::AlreadyGenerating(session.id.clone()));
            }
            let batch = BatchState::start(base_prompt.clone(), providers.clone(), iterations);
            let run_id = batch.run_id.clone();
            session.batch = Some(batch);
            Ok((run_id, session.source.asset_ref.clone()))
        })?;
        info!(
            run_id = %run_id,
            providers = ?providers,
            chunk = self.policy.chunk_size(),
            "batch started"
        );

        let plan = Arc::new(BatchPlan {
            session_id: session_id.clone(),
            run_id: run_id.clone(),
            base_prompt,
            total: iterations,
            source,
            adapters,
            providers,
            variation: self.variation.clone(),
        });
        let store = self.store.clone();
        let policy = Arc::clone(&self.policy);
        let supervised = async move {
            let work = AssertUnwindSafe(run_chunks(&store, &plan, &policy)).catch_unwind();
            match work.await {
                Ok(Ok(())) => plan.settle(&store, BatchState::complete),
                Ok(Err(MorphError::SessionNotFound(_))) => {
                    debug!(session_id = %plan.session_id, "session removed during batch");
                }
                Ok(Err(fault)) => {
                    error!(session_id = %plan.session_id, error = %fault, "batch fault");
                    plan.settle(&store, |batch| batch.fail(fault.to_string()));
                }
                Err(_panic) => plan.settle(&store, |batch| batch.fail("batch task crashed")),
            }
        };
        spawn_supervised(&self.store, session_id, &run_id, supervised)?;
        Ok(run_id)
    }
}

struct BatchPlan {
    session_id: SessionId,
    run_id: RunId,
    base_prompt: String,
    total: u32,
    source: AssetRef,
    adapters: Vec<Arc<ProviderAdapter>>,
    providers: Vec<ProviderName>,
    variation: VariationEngine,
}

impl BatchPlan {
    fn slowest_timeout(&self) -> Duration {
        self.adapters
            .iter()
            .map(|adapter| adapter.profile().timeout)
            .max()
            .unwrap_or_default()
    }

    /// One iteration: vary the prompt, then fan out to every provider.
    async fn run_iteration(self: Arc<Self>, iteration: u32) -> IterationOutcome {
        let prompt = self.variation.vary_prompt(&self.base_prompt, iteration);
        let results = fan_out(&self.adapters, |adapter| GenerationRequest {
            session_id: self.session_id.clone(),
            prompt: prompt.clone(),
            source: self.source.clone(),
            asset_label: self.variation.descriptive_label(
                &self.base_prompt,
                iteration,
                adapter.name().as_str(),
            ),
            variation: Some(VariationContext {
                base_prompt: self.base_prompt.clone(),
                iteration,
            }),
        })
        .await;
        IterationOutcome::new(iteration, prompt, results)
    }

    fn record(&self, store: &SessionStore, outcome: IterationOutcome) -> MorphResult<()> {
        let iteration = outcome.iteration;
        let recorded = store.update(&self.session_id, |session| {
            current_batch(session, &self.run_id).map(|batch| batch.record_iteration(outcome))
        })?;
        match recorded {
            Some(Ok(true)) => Ok(()),
            Some(Ok(false)) => {
                warn!(session_id = %self.session_id, iteration, "iteration already recorded");
                Ok(())
            }
            Some(Err(fault)) => Err(fault),
            None => Err(MorphError::Orchestration(format!(
                "batch {} was replaced while running",
                self.run_id
            ))),
        }
    }

    fn settle(&self, store: &SessionStore, finish: impl FnOnce(&mut BatchState) -> bool) {
        let settled = store.update(&self.session_id, |session| {
            current_batch(session, &self.run_id).map(|batch| {
                let changed = finish(batch);
                (changed, batch.status, batch.progress.settled(), batch.progress.duration_ms)
            })
        });
        if let Ok(Some((true, status, settled, duration_ms))) = settled {
            info!(
                session_id = %self.session_id,
                run_id = %self.run_id,
                status = ?status,
                settled,
                duration_ms,
                "batch settled"
            );
        }
    }
}

/// Drive every chunk to completion, strictly one chunk after another.
///
/// Each chunk runs under its own watchdog. Exceeding it drops the chunk's
/// `JoinSet`, which aborts the iterations still in flight, and fails the batch.
async fn run_chunks(
    store: &SessionStore,
    plan: &Arc<BatchPlan>,
    policy: &OrchestrationPolicy,
) -> MorphResult<()> {
    let iterations: Vec<u32> = (1..=plan.total).collect();
    let chunks: Vec<&[u32]> = iterations.chunks(policy.chunk_size()).collect();
    let chunk_count = chunks.len();
    let budget = policy.chunk_budget(plan.slowest_timeout());

    for (index, chunk) in chunks.into_iter().enumerate() {
        debug!(
            session_id = %plan.session_id,
            chunk = index + 1,
            chunk_count,
            first = chunk.first().copied(),
            size = chunk.len(),
            "running chunk"
        );
        tokio::time::timeout(budget, run_chunk(store, plan, chunk))
            .await
            .map_err(|_| {
                MorphError::Orchestration(format!(
                    "chunk {} of {chunk_count} exceeded deadline of {budget:?}",
                    index + 1
                ))
            })??;

        if index + 1 < chunk_count {
            let pause = policy.pacing.pause_after(chunk.len());
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
    }
    Ok(())
}

async fn run_chunk(store: &SessionStore, plan: &Arc<BatchPlan>, chunk: &[u32]) -> MorphResult<()> {
    let mut tasks = JoinSet::new();
    let mut iterations = HashMap::with_capacity(chunk.len());
    for &iteration in chunk {
        let handle = tasks.spawn(Arc::clone(plan).run_iteration(iteration));
        iterations.insert(handle.id(), iteration);
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        let outcome = match joined {
            Ok((_, outcome)) => outcome,
            Err(join_error) => {
                let Some(&iteration) = iterations.get(&join_error.id()) else {
                    return Err(MorphError::Orchestration(format!(
                        "unknown iteration task settled: {join_error}"
                    )));
                };
                warn!(session_id = %plan.session_id, iteration, error = %join_error, "iteration task faulted");
                let reason = if join_error.is_panic() {
                    "iteration task crashed".to_owned()
                } else {
                    format!("iteration task aborted: {join_error}")
                };
                IterationOutcome::faulted(
                    iteration,
                    plan.variation.vary_prompt(&plan.base_prompt, iteration),
                    &plan.providers,
                    reason,
                )
            }
        };
        plan.record(store, outcome)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::config::ChunkPacing;
    use crate::testing::{adapter, simulated_adapter, source, wait_for};
    use anyhow::Result;
    use morph_protocol::{BatchStatus, FailureKind, ProviderOutcome};
    use morph_providers::{SimulatedBehavior, SimulatedFailure, SimulatedProvider};

    fn quick_policy(parallel_chunk: usize) -> OrchestrationPolicy {
        OrchestrationPolicy {
            parallel_chunk,
            pacing: ChunkPacing::fixed(Duration::from_millis(1)),
            ..OrchestrationPolicy::default()
        }
    }

    fn orchestrator(
        adapters: Vec<ProviderAdapter>,
        policy: OrchestrationPolicy,
    ) -> (SessionStore, BatchOrchestrator) {
        let mut registry = ProviderRegistry::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        let store = SessionStore::new();
        let orchestrator = BatchOrchestrator::new(
            store.clone(),
            Arc::new(registry),
            VariationEngine::new(morph_variation::ThemeCatalog::builtin()),
            Arc::new(policy),
        );
        (store, orchestrator)
    }

    async fn settled_batch(store: &SessionStore, session_id: &SessionId) -> Result<BatchState> {
        let session = wait_for(store, session_id, |s| {
            s.batch.as_ref().is_some_and(|b| b.status.is_terminal())
        })
        .await?;
        session
            .batch
            .ok_or_else(|| anyhow::anyhow!("no batch recorded"))
    }

    #[tokio::test]
    async fn twenty_five_iterations_in_chunks_of_ten() -> Result<()> {
        let (store, orchestrator) = orchestrator(
            vec![adapter("alpha", SimulatedBehavior::Succeed).0],
            quick_policy(10),
        );
        let session = store.create(source());
        orchestrator.start(&session.id, "a portrait", &ProviderSelection::All, 25)?;

        let batch = settled_batch(&store, &session.id).await?;
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.progress.current, 25);
        assert_eq!(batch.results.len(), 25);
        assert_eq!(batch.progress.completed.len() + batch.progress.failed.len(), 25);
        assert!(batch.progress.end_time.is_some());
        assert!(batch.progress.duration_ms.is_some());

        let ordered: Vec<u32> = batch.results_in_order().iter().map(|r| r.iteration).collect();
        assert_eq!(ordered, (1..=25).collect::<Vec<_>>());
        Ok(())
    }

    #[tokio::test]
    async fn completed_and_failed_partition_the_iteration_range() -> Result<()> {
        let (alpha, _) = simulated_adapter(
            "alpha",
            SimulatedProvider::new(SimulatedBehavior::Succeed).failing_iterations([3, 7, 12]),
        );
        let (store, orchestrator) = orchestrator(vec![alpha], quick_policy(4));
        let session = store.create(source());
        orchestrator.start(&session.id, "a portrait", &ProviderSelection::All, 13)?;

        let batch = settled_batch(&store, &session.id).await?;
        let completed: BTreeSet<u32> = batch.progress.completed.iter().copied().collect();
        let failed: BTreeSet<u32> = batch.progress.failed.iter().copied().collect();
        assert_eq!(failed, BTreeSet::from([3, 7, 12]));
        assert!(completed.is_disjoint(&failed));
        let union: BTreeSet<u32> = completed.union(&failed).copied().collect();
        assert_eq!(union, (1..=13).collect());
        assert_eq!(batch.progress.completed.len(), completed.len());
        Ok(())
    }

    #[tokio::test]
    async fn failing_provider_does_not_fail_sibling_iterations() -> Result<()> {
        let (store, orchestrator) = orchestrator(
            vec![
                adapter("alpha", SimulatedBehavior::Fail(SimulatedFailure::Auth)).0,
                adapter("beta", SimulatedBehavior::Succeed).0,
            ],
            quick_policy(3),
        );
        let session = store.create(source());
        orchestrator.start(&session.id, "avatar of me", &ProviderSelection::All, 6)?;

        let batch = settled_batch(&store, &session.id).await?;
        assert_eq!(batch.progress.completed.len(), 6);
        assert!(batch.progress.failed.is_empty());
        for iteration in &batch.results {
            let keys: Vec<&str> = iteration.results.keys().map(|k| k.as_str()).collect();
            assert_eq!(keys, ["alpha", "beta"]);
            assert!(!iteration.results["alpha"].is_success());
            assert!(iteration.results["beta"].is_success());
        }
        let summary = batch.summary();
        assert_eq!(summary.total_iterations, 6);
        assert_eq!(summary.successful_results, 6);
        assert_eq!(summary.failed_results, 6);
        Ok(())
    }

    #[tokio::test]
    async fn iterations_carry_distinct_varied_prompts_and_labels() -> Result<()> {
        let (store, orchestrator) = orchestrator(
            vec![adapter("alpha", SimulatedBehavior::Succeed).0],
            quick_policy(10),
        );
        let session = store.create(source());
        orchestrator.start(&session.id, "avatar of me", &ProviderSelection::All, 3)?;

        let batch = settled_batch(&store, &session.id).await?;
        let ordered = batch.results_in_order();
        assert_eq!(ordered[0].prompt, "avatar of me, wearing a tailored navy suit");
        assert_eq!(ordered[1].prompt, "avatar of me, wearing a medieval knight's armour");
        let asset = ordered[1].results["alpha"]
            .asset_ref()
            .ok_or_else(|| anyhow::anyhow!("missing asset"))?;
        assert!(
            asset
                .as_str()
                .starts_with("/generated/a-medieval-knight-s-armour_iter002_alpha_")
        );
        Ok(())
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_one_chunk() -> Result<()> {
        let (alpha, alpha_sim) = simulated_adapter(
            "alpha",
            SimulatedProvider::new(SimulatedBehavior::Succeed)
                .with_latency(Duration::from_millis(20)),
        );
        let (beta, beta_sim) = simulated_adapter(
            "beta",
            SimulatedProvider::new(SimulatedBehavior::Succeed)
                .with_latency(Duration::from_millis(20)),
        );
        let (store, orchestrator) = orchestrator(vec![alpha, beta], quick_policy(4));
        let session = store.create(source());
        orchestrator.start(&session.id, "p", &ProviderSelection::All, 10)?;

        settled_batch(&store, &session.id).await?;
        assert!(alpha_sim.peak_in_flight() <= 4);
        assert!(beta_sim.peak_in_flight() <= 4);
        assert_eq!(alpha_sim.calls(), 10);
        assert_eq!(beta_sim.calls(), 10);
        Ok(())
    }

    #[tokio::test]
    async fn pauses_between_chunks_but_not_after_the_last() -> Result<()> {
        let policy = OrchestrationPolicy {
            parallel_chunk: 2,
            pacing: ChunkPacing::fixed(Duration::from_millis(150)),
            ..OrchestrationPolicy::default()
        };
        let (store, orchestrator) =
            orchestrator(vec![adapter("alpha", SimulatedBehavior::Succeed).0], policy);
        let session = store.create(source());

        let started = Instant::now();
        orchestrator.start(&session.id, "p", &ProviderSelection::All, 4)?;
        settled_batch(&store, &session.id).await?;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(150), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(300 + 2_000), "{elapsed:?}");
        Ok(())
    }

    #[tokio::test]
    async fn out_of_range_iterations_are_rejected_without_side_effects() -> Result<()> {
        let (alpha, alpha_sim) = adapter("alpha", SimulatedBehavior::Succeed);
        let (store, orchestrator) = orchestrator(vec![alpha], quick_policy(10));
        let session = store.create(source());

        for iterations in [0, 1001] {
            let error = orchestrator
                .start(&session.id, "p", &ProviderSelection::All, iterations)
                .unwrap_err();
            assert!(
                matches!(error, MorphError::InvalidIterations { requested, .. } if requested == iterations)
            );
        }
        assert_eq!(store.get(&session.id), Some(session.clone()));
        assert!(!store.has_task(&session.id));
        assert_eq!(alpha_sim.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (_, orchestrator) = orchestrator(
            vec![adapter("alpha", SimulatedBehavior::Succeed).0],
            quick_policy(10),
        );
        let error = orchestrator
            .start(&SessionId::new("missing"), "p", &ProviderSelection::All, 3)
            .unwrap_err();
        assert!(matches!(error, MorphError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn batch_rejected_while_single_generation_runs() -> Result<()> {
        let (store, orchestrator) = orchestrator(
            vec![adapter("alpha", SimulatedBehavior::Succeed).0],
            quick_policy(10),
        );
        let session = store.create(source());
        store.update(&session.id, |s| {
            s.generation = Some(morph_protocol::GenerationRun::start(
                "p",
                &[ProviderName::from("alpha")],
            ));
        })?;

        let error = orchestrator
            .start(&session.id, "p", &ProviderSelection::All, 3)
            .unwrap_err();
        assert!(matches!(error, MorphError::AlreadyGenerating(_)));
        assert!(store.read(&session.id, |s| s.batch.is_none())?);
        Ok(())
    }

    fn timed_adapter(name: &str, provider: SimulatedProvider, timeout: Duration) -> ProviderAdapter {
        ProviderAdapter::new(
            morph_providers::ProviderProfile::new(name, morph_protocol::ProviderKind::TextToImage)
                .timeout(timeout),
            Arc::new(provider),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn watchdog_fails_a_stuck_chunk() -> Result<()> {
        let alpha = timed_adapter(
            "alpha",
            SimulatedProvider::new(SimulatedBehavior::Block(Duration::from_millis(600))),
            Duration::from_millis(50),
        );
        let policy = OrchestrationPolicy {
            chunk_slack: Duration::from_millis(50),
            ..quick_policy(1)
        };
        let (store, orchestrator) = orchestrator(vec![alpha], policy);
        let session = store.create(source());
        orchestrator.start(&session.id, "p", &ProviderSelection::All, 2)?;

        let batch = settled_batch(&store, &session.id).await?;
        assert_eq!(batch.status, BatchStatus::Error);
        let error = batch.progress.error.clone().unwrap_or_default();
        assert!(
            error.contains("chunk 1 of 2 exceeded deadline of 100ms"),
            "{error}"
        );
        assert!(batch.progress.end_time.is_some());
        assert!(batch.results.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn long_batch_with_prompt_providers_outlives_one_chunk_budget() -> Result<()> {
        let alpha = timed_adapter(
            "alpha",
            SimulatedProvider::new(SimulatedBehavior::Succeed)
                .with_latency(Duration::from_millis(20)),
            Duration::from_millis(100),
        );
        let beta = timed_adapter(
            "beta",
            SimulatedProvider::new(SimulatedBehavior::Succeed)
                .with_latency(Duration::from_millis(20)),
            Duration::from_millis(100),
        );
        let policy = OrchestrationPolicy {
            parallel_chunk: 1,
            pacing: ChunkPacing::fixed(Duration::from_millis(50)),
            chunk_slack: Duration::from_millis(200),
            ..OrchestrationPolicy::default()
        };
        let budget = policy.chunk_budget(Duration::from_millis(100));
        let (store, orchestrator) = orchestrator(vec![alpha, beta], policy);
        let session = store.create(source());

        let started = Instant::now();
        orchestrator.start(&session.id, "p", &ProviderSelection::All, 10)?;
        let batch = settled_batch(&store, &session.id).await?;
        let elapsed = started.elapsed();

        assert!(elapsed > budget, "{elapsed:?} within one chunk budget {budget:?}");
        assert_eq!(batch.status, BatchStatus::Completed, "{:?}", batch.progress.error);
        assert_eq!(batch.progress.settled(), 10);
        assert_eq!(batch.progress.completed.len(), 10);
        Ok(())
    }

    #[tokio::test]
    async fn provider_timeouts_become_failed_iterations() -> Result<()> {
        let hanging = Arc::new(SimulatedProvider::new(SimulatedBehavior::Hang));
        let alpha = ProviderAdapter::new(
            morph_providers::ProviderProfile::new("alpha", morph_protocol::ProviderKind::TextToImage)
                .timeout(Duration::from_millis(30)),
            hanging,
        );
        let (store, orchestrator) = orchestrator(vec![alpha], quick_policy(5));
        let session = store.create(source());
        orchestrator.start(&session.id, "p", &ProviderSelection::All, 5)?;

        let batch = settled_batch(&store, &session.id).await?;
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.progress.failed.len(), 5);
        for iteration in &batch.results {
            match &iteration.results["alpha"] {
                ProviderOutcome::Failure(failure) => assert_eq!(failure.kind, FailureKind::Timeout),
                other => panic!("expected timeout, got {other:?}"),
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn deleting_the_session_stops_the_batch() -> Result<()> {
        let (alpha, alpha_sim) = simulated_adapter(
            "alpha",
            SimulatedProvider::new(SimulatedBehavior::Succeed)
                .with_latency(Duration::from_millis(50)),
        );
        let (store, orchestrator) = orchestrator(vec![alpha], quick_policy(1));
        let session = store.create(source());
        orchestrator.start(&session.id, "p", &ProviderSelection::All, 50)?;

        tokio::time::sleep(Duration::from_millis(80)).await;
        store.remove(&session.id);
        let calls_at_removal = alpha_sim.calls();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(alpha_sim.calls() <= calls_at_removal + 1);
        assert!(alpha_sim.calls() < 50);
        Ok(())
    }
}
