use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pause inserted between two batch chunks: `base + per_iteration * chunk_len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPacing {
    pub base: Duration,
    pub per_iteration: Duration,
}

impl ChunkPacing {
    pub fn fixed(base: Duration) -> Self {
        Self {
            base,
            per_iteration: Duration::ZERO,
        }
    }

    pub fn pause_after(&self, chunk_len: usize) -> Duration {
        let scaled = u32::try_from(chunk_len)
            .ok()
            .and_then(|len| self.per_iteration.checked_mul(len))
            .unwrap_or(Duration::MAX);
        self.base.saturating_add(scaled)
    }
}

impl Default for ChunkPacing {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(3))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationPolicy {
    /// Iterations running concurrently inside one chunk.
    pub parallel_chunk: usize,
    pub pacing: ChunkPacing,
    /// Watchdog for a single generation run.
    pub generation_deadline: Duration,
    /// Headroom on top of the slowest adapter timeout before a batch chunk
    /// is declared stuck. The watchdog is re-armed for every chunk.
    pub chunk_slack: Duration,
    pub max_iterations: u32,
}

impl Default for OrchestrationPolicy {
    fn default() -> Self {
        Self {
            parallel_chunk: 10,
            pacing: ChunkPacing::default(),
            generation_deadline: Duration::from_secs(300),
            chunk_slack: Duration::from_secs(30),
            max_iterations: 1000,
        }
    }
}

impl OrchestrationPolicy {
    /// A chunk size of zero would never make progress; treat it as one.
    pub fn chunk_size(&self) -> usize {
        self.parallel_chunk.max(1)
    }

    /// Watchdog budget for one chunk whose slowest provider call may take
    /// `slowest_timeout`. Pauses between chunks are outside the budget.
    pub fn chunk_budget(&self, slowest_timeout: Duration) -> Duration {
        slowest_timeout.saturating_add(self.chunk_slack)
    }
}
