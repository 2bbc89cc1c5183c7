//! Read-only projections served to polling clients.
//!
//! Every view is built from one snapshot taken under the session lock, so a
//! client never sees a half-applied update.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use morph_protocol::{
    AssetRef, BatchProgress, BatchState, BatchStatus, BatchSummary, GenerationRun,
    GenerationState, IterationOutcome, ProviderName, ProviderOutcome, ProviderStatus, Session,
    SessionId, SourceAsset,
};
use serde::Serialize;

/// Projected status of a run; `idle` means the run was never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Generating,
    Completed,
    Error,
}

impl RunStatus {
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl From<GenerationState> for RunStatus {
    fn from(state: GenerationState) -> Self {
        match state {
            GenerationState::Idle => Self::Idle,
            GenerationState::Generating => Self::Generating,
            GenerationState::Completed => Self::Completed,
            GenerationState::Error => Self::Error,
        }
    }
}

impl From<Option<BatchStatus>> for RunStatus {
    fn from(status: Option<BatchStatus>) -> Self {
        match status {
            None => Self::Idle,
            Some(BatchStatus::Generating) => Self::Generating,
            Some(BatchStatus::Completed) => Self::Completed,
            Some(BatchStatus::Error) => Self::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionImage {
    pub session_id: SessionId,
    pub asset_ref: AssetRef,
    pub original_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionImage {
    pub(crate) fn project(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            asset_ref: session.source.asset_ref.clone(),
            original_name: session.source.original_name.clone(),
            created_at: session.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationProgress {
    pub session_id: SessionId,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub progress: IndexMap<ProviderName, ProviderStatus>,
    pub results: IndexMap<ProviderName, ProviderOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_complete: bool,
}

impl GenerationProgress {
    pub(crate) fn project(session: &Session) -> Self {
        let status = RunStatus::from(session.generation_state());
        let run = session.generation.as_ref();
        Self {
            session_id: session.id.clone(),
            status,
            prompt: run.map(|run| run.prompt.clone()),
            progress: run.map(|run| run.providers.clone()).unwrap_or_default(),
            results: run.map(|run| run.results.clone()).unwrap_or_default(),
            error: run.and_then(|run| run.error.clone()),
            is_complete: status.is_complete(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgressView {
    pub session_id: SessionId,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub providers: Vec<ProviderName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<BatchProgress>,
    /// Settlement order; sort by `iteration` for numeric order.
    pub results: Vec<IterationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
    pub is_complete: bool,
}

impl BatchProgressView {
    pub(crate) fn project(session: &Session) -> Self {
        let batch = session.batch.as_ref();
        let status = RunStatus::from(batch.map(|batch| batch.status));
        Self {
            session_id: session.id.clone(),
            status,
            prompt: batch.map(|batch| batch.base_prompt.clone()),
            providers: batch.map(|batch| batch.providers.clone()).unwrap_or_default(),
            progress: batch.map(|batch| batch.progress.clone()),
            results: batch.map(|batch| batch.results.clone()).unwrap_or_default(),
            summary: batch.map(BatchState::summary),
            is_complete: status.is_complete(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    #[serde(flatten)]
    pub state: BatchState,
    pub summary: BatchSummary,
}

/// Everything known about a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub session_id: SessionId,
    pub source: SourceAsset,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchResult>,
}

impl SessionResult {
    pub(crate) fn project(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            source: session.source.clone(),
            created_at: session.created_at,
            status: RunStatus::from(session.generation_state()),
            generation: session.generation.clone(),
            batch: session.batch.as_ref().map(|batch| BatchResult {
                state: batch.clone(),
                summary: batch.summary(),
            }),
        }
    }
}

/// Gallery entry for a batch that finished with status `completed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedBatch {
    pub session_id: SessionId,
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
    pub total_images: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_asset: Option<AssetRef>,
}

impl CompletedBatch {
    pub(crate) fn project(session: &Session) -> Option<Self> {
        let batch = session.batch.as_ref()?;
        if batch.status != BatchStatus::Completed {
            return None;
        }
        let ordered = batch.results_in_order();
        let mut successes = ordered
            .iter()
            .flat_map(|iteration| iteration.results.values())
            .filter_map(ProviderOutcome::asset_ref);
        let preview_asset = successes.next().cloned();
        let total_images = preview_asset.iter().count() + successes.count();
        Some(Self {
            session_id: session.id.clone(),
            prompt: batch.base_prompt.clone(),
            timestamp: batch.progress.end_time.unwrap_or(batch.progress.start_time),
            total_images,
            preview_asset,
        })
    }
}
