//! # morph-protocol — shared contract for the morph generation engine
//!
//! This crate defines the data model that every other morph crate agrees on:
//! sessions, per-provider progress, provider outcomes, batch state, the error
//! taxonomy and the [`ImageProvider`] port implemented by vendor glue.
//!
//! It carries no runtime dependencies (no tokio, no axum) so it can be used as
//! a pure contract crate.
//!
//! ## Module Overview
//!
//! - [`ids`] — Typed identifiers (SessionId, RunId, ProviderName, AssetRef)
//! - [`outcome`] — ProviderOutcome, GeneratedAsset, Cost, FailureKind
//! - [`session`] — Session, GenerationState, ProviderStatus, GenerationRun
//! - [`batch`] — BatchState, BatchProgress, IterationOutcome, BatchSummary
//! - [`ports`] — The provider capability boundary
//! - [`error`] — ProviderError, MorphError, MorphResult

pub mod batch;
pub mod error;
pub mod ids;
pub mod outcome;
pub mod ports;
pub mod session;

pub use batch::{BatchProgress, BatchState, BatchStatus, BatchSummary, IterationOutcome};
pub use error::{MorphError, MorphResult, ProviderError};
pub use ids::{AssetRef, ProviderName, RunId, SessionId};
pub use outcome::{Cost, FailureKind, GeneratedAsset, ProviderFailure, ProviderOutcome};
pub use ports::{GeneratedImage, GenerationRequest, ImageProvider, ProviderKind, VariationContext};
pub use session::{GenerationRun, GenerationState, ProviderStatus, Session, SourceAsset};
