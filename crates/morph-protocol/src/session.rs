//! Session and single-generation run types.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::batch::BatchState;
use crate::error::{MorphError, MorphResult};
use crate::ids::{AssetRef, ProviderName, RunId, SessionId};
use crate::outcome::{FailureKind, ProviderOutcome};

/// Overall state of a generation run. Moves only forward:
/// `idle -> generating -> {completed | error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    #[default]
    Idle,
    Generating,
    Completed,
    Error,
}

impl GenerationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Generating)
                | (Self::Generating, Self::Completed)
                | (Self::Generating, Self::Error)
        )
    }
}

/// Progress of one provider inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Pending,
    Generating,
    Completed,
    Error,
}

impl ProviderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    fn can_advance_to(self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Generating => next.is_terminal(),
            Self::Completed | Self::Error => false,
        }
    }
}

/// The uploaded image a session works on. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAsset {
    pub asset_ref: AssetRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl SourceAsset {
    pub fn new(asset_ref: AssetRef, original_name: Option<String>) -> Self {
        Self {
            asset_ref,
            original_name,
            uploaded_at: Utc::now(),
        }
    }
}

/// One single-shot generation request fanned out to a fixed provider set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRun {
    pub run_id: RunId,
    pub prompt: String,
    pub state: GenerationState,
    pub providers: IndexMap<ProviderName, ProviderStatus>,
    pub results: IndexMap<ProviderName, ProviderOutcome>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationRun {
    /// Open a run for exactly `providers`; the key set never changes afterwards.
    pub fn start(prompt: impl Into<String>, providers: &[ProviderName]) -> Self {
        Self {
            run_id: RunId::default(),
            prompt: prompt.into(),
            state: GenerationState::Generating,
            providers: providers
                .iter()
                .map(|provider| (provider.clone(), ProviderStatus::Pending))
                .collect(),
            results: IndexMap::new(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Advance one provider's status. Returns `false` when the move would regress.
    pub fn mark_provider(
        &mut self,
        provider: &ProviderName,
        status: ProviderStatus,
    ) -> MorphResult<bool> {
        let current = self
            .providers
            .get_mut(provider)
            .ok_or_else(|| MorphError::ProviderNotInRun {
                provider: provider.clone(),
            })?;
        if !current.can_advance_to(status) {
            return Ok(false);
        }
        *current = status;
        Ok(true)
    }

    /// Store a provider's outcome and settle its status accordingly.
    pub fn record_outcome(&mut self, outcome: ProviderOutcome) -> MorphResult<bool> {
        let provider = outcome.provider().clone();
        let status = if outcome.is_success() {
            ProviderStatus::Completed
        } else {
            ProviderStatus::Error
        };
        if !self.mark_provider(&provider, status)? {
            return Ok(false);
        }
        self.results.insert(provider, outcome);
        Ok(true)
    }

    pub fn is_settled(&self) -> bool {
        self.providers.values().all(|status| status.is_terminal())
    }

    pub fn complete(&mut self) -> bool {
        if !self.state.can_advance_to(GenerationState::Completed) {
            return false;
        }
        self.state = GenerationState::Completed;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Force the run into `error`, settling any provider that is still running.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.state.can_advance_to(GenerationState::Error) {
            return false;
        }
        let message = message.into();
        for (provider, status) in self.providers.iter_mut() {
            if status.is_terminal() {
                continue;
            }
            *status = ProviderStatus::Error;
            self.results.insert(
                provider.clone(),
                ProviderOutcome::failure(
                    provider.clone(),
                    FailureKind::Internal,
                    format!("{provider}: {message}"),
                ),
            );
        }
        self.state = GenerationState::Error;
        self.error = Some(message);
        self.finished_at = Some(Utc::now());
        true
    }
}

/// Per-upload unit of state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub source: SourceAsset,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationRun>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchState>,
}

impl Session {
    pub fn new(source: SourceAsset) -> Self {
        Self {
            id: SessionId::default(),
            source,
            created_at: Utc::now(),
            generation: None,
            batch: None,
        }
    }

    pub fn generation_state(&self) -> GenerationState {
        self.generation
            .as_ref()
            .map_or(GenerationState::Idle, |run| run.state)
    }

    /// True while either a single generation or a batch is still running.
    pub fn is_busy(&self) -> bool {
        let generating = self.generation_state() == GenerationState::Generating;
        let batching = self
            .batch
            .as_ref()
            .is_some_and(|batch| !batch.status.is_terminal());
        generating || batching
    }
}
