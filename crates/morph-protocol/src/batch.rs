//! Batch generation state.
//!
//! A batch repeats one base prompt N times with deterministic variation. The
//! `completed` and `failed` lists are disjoint and every iteration number lands
//! in exactly one of them, once, when that iteration settles.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{MorphError, MorphResult};
use crate::ids::{ProviderName, RunId};
use crate::outcome::{FailureKind, ProviderOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Generating,
    Completed,
    Error,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub current: u32,
    pub total: u32,
    pub completed: Vec<u32>,
    pub failed: Vec<u32>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchProgress {
    fn new(total: u32) -> Self {
        Self {
            current: 0,
            total,
            completed: Vec::new(),
            failed: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn is_recorded(&self, iteration: u32) -> bool {
        self.completed.contains(&iteration) || self.failed.contains(&iteration)
    }

    pub fn settled(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    fn close(&mut self) {
        let end = Utc::now();
        self.end_time = Some(end);
        self.duration_ms = Some(
            (end - self.start_time)
                .num_milliseconds()
                .max(0)
                .try_into()
                .unwrap_or_default(),
        );
    }
}

/// Result of one batch iteration across every requested provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationOutcome {
    pub iteration: u32,
    /// The varied prompt actually sent to providers.
    pub prompt: String,
    pub results: IndexMap<ProviderName, ProviderOutcome>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IterationOutcome {
    pub fn new(
        iteration: u32,
        prompt: impl Into<String>,
        results: IndexMap<ProviderName, ProviderOutcome>,
    ) -> Self {
        Self {
            iteration,
            prompt: prompt.into(),
            results,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Failure record for an iteration whose task never settled normally.
    /// Every requested provider gets a failure entry carrying `reason`.
    pub fn faulted(
        iteration: u32,
        prompt: impl Into<String>,
        providers: &[ProviderName],
        reason: impl Into<String>,
    ) -> Self {
        let reason = reason.into();
        let results = providers
            .iter()
            .map(|provider| {
                (
                    provider.clone(),
                    ProviderOutcome::failure(
                        provider.clone(),
                        FailureKind::Internal,
                        format!("{provider}: {reason}"),
                    ),
                )
            })
            .collect();
        Self {
            iteration,
            prompt: prompt.into(),
            results,
            timestamp: Utc::now(),
            error: Some(reason),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.results.values().any(ProviderOutcome::is_success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_iterations: usize,
    pub successful_results: usize,
    pub failed_results: usize,
    pub total_cost: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchState {
    pub run_id: RunId,
    pub base_prompt: String,
    pub providers: Vec<ProviderName>,
    pub status: BatchStatus,
    pub progress: BatchProgress,
    /// Settlement order, not iteration order. Sort by `iteration` when needed.
    pub results: Vec<IterationOutcome>,
}

impl BatchState {
    pub fn start(base_prompt: impl Into<String>, providers: Vec<ProviderName>, total: u32) -> Self {
        Self {
            run_id: RunId::default(),
            base_prompt: base_prompt.into(),
            providers,
            status: BatchStatus::Generating,
            progress: BatchProgress::new(total),
            results: Vec::new(),
        }
    }

    /// Record a settled iteration. Returns `false` if it was already recorded
    /// or the batch is no longer running.
    pub fn record_iteration(&mut self, outcome: IterationOutcome) -> MorphResult<bool> {
        let iteration = outcome.iteration;
        if iteration == 0 || iteration > self.progress.total {
            return Err(MorphError::Orchestration(format!(
                "iteration {iteration} outside batch of {}",
                self.progress.total
            )));
        }
        if self.status.is_terminal() || self.progress.is_recorded(iteration) {
            return Ok(false);
        }
        if outcome.succeeded() {
            self.progress.completed.push(iteration);
        } else {
            self.progress.failed.push(iteration);
        }
        // Settlement order is not numeric order; `current` only moves forward.
        self.progress.current = self.progress.current.max(iteration);
        self.results.push(outcome);
        Ok(true)
    }

    pub fn complete(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = BatchStatus::Completed;
        self.progress.close();
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = BatchStatus::Error;
        self.progress.error = Some(message.into());
        self.progress.close();
        true
    }

    pub fn summary(&self) -> BatchSummary {
        let mut successful_results = 0;
        let mut failed_results = 0;
        let mut total_cost = 0.0;
        for outcome in self.results.iter().flat_map(|iteration| iteration.results.values()) {
            match outcome.cost() {
                Some(cost) => {
                    successful_results += 1;
                    total_cost += cost.total;
                }
                None => failed_results += 1,
            }
        }
        BatchSummary {
            total_iterations: self.results.len(),
            successful_results,
            failed_results,
            total_cost,
            currency: "USD".to_owned(),
        }
    }

    /// Results sorted by iteration number.
    pub fn results_in_order(&self) -> Vec<&IterationOutcome> {
        let mut ordered: Vec<&IterationOutcome> = self.results.iter().collect();
        ordered.sort_by_key(|outcome| outcome.iteration);
        ordered
    }
}
