//! Orchestration engine for morph.
//!
//! [`GenerationOrchestrator`] fans one prompt out to a provider set;
//! [`BatchOrchestrator`] repeats a varied prompt N times in sequential chunks
//! of bounded parallelism. Both validate synchronously, record the run in the
//! [`morph_store::SessionStore`] and return before any provider is called. The
//! background run is supervised: its handle lives in the store, panics and
//! deadline overruns are converted into a terminal `error` state.

mod batch;
mod config;
mod fanout;
mod single;
mod supervise;

#[cfg(test)]
mod testing;

pub use batch::BatchOrchestrator;
pub use config::{ChunkPacing, OrchestrationPolicy};
pub use single::GenerationOrchestrator;

use morph_protocol::{MorphError, MorphResult};

fn normalize_prompt(prompt: &str) -> MorphResult<String> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(MorphError::EmptyPrompt);
    }
    Ok(prompt.to_owned())
}
