//! Error types for the morph engine.

use std::time::Duration;

use thiserror::Error;

use crate::ids::{ProviderName, SessionId};
use crate::outcome::FailureKind;

/// Failures raised inside a provider adapter.
///
/// These never cross the adapter boundary as errors: the adapter converts them
/// into [`crate::ProviderOutcome::Failure`] with a provider-prefixed message.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid credentials: {0}")]
    Auth(String),
    #[error("rate limit reached: {0}")]
    RateLimited(String),
    #[error("no result within {} seconds", after.as_secs())]
    Timeout { after: Duration },
    #[error("no usable image in response: {0}")]
    InvalidResponse(String),
    #[error("provider not configured")]
    Disabled,
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Auth(_) => FailureKind::Auth,
            Self::RateLimited(_) => FailureKind::RateLimited,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::InvalidResponse(_) => FailureKind::InvalidResponse,
            Self::Disabled => FailureKind::Disabled,
            Self::Transport(_) => FailureKind::Transport,
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Validation and orchestration errors surfaced to API callers.
#[derive(Debug, Error)]
pub enum MorphError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("prompt is required")]
    EmptyPrompt,
    #[error("source asset reference is required")]
    EmptySourceAsset,
    #[error("iterations must be between {min} and {max}, got {requested}")]
    InvalidIterations { requested: u32, min: u32, max: u32 },
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("no image providers are configured")]
    NoProvidersConfigured,
    #[error("session {0} already has a generation in progress")]
    AlreadyGenerating(SessionId),
    #[error("provider {provider} is not part of the current run")]
    ProviderNotInRun { provider: ProviderName },
    #[error("orchestration fault: {0}")]
    Orchestration(String),
}

impl MorphError {
    /// True for errors caused by the request itself rather than server state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyPrompt
                | Self::EmptySourceAsset
                | Self::InvalidIterations { .. }
                | Self::UnknownProvider(_)
        )
    }
}

/// Convenience result type for morph operations.
pub type MorphResult<T> = Result<T, MorphError>;
