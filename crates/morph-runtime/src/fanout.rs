use std::sync::Arc;

use futures_util::future::join_all;
use indexmap::IndexMap;
use morph_protocol::{GenerationRequest, ProviderName, ProviderOutcome};
use morph_providers::ProviderAdapter;

/// Call every adapter concurrently and collect one outcome per provider.
///
/// Keys follow the order of `adapters`, not completion order. Adapters never
/// fail, so one provider's error cannot cancel or delay its siblings beyond
/// its own timeout.
pub(crate) async fn fan_out(
    adapters: &[Arc<ProviderAdapter>],
    request_for: impl Fn(&ProviderAdapter) -> GenerationRequest,
) -> IndexMap<ProviderName, ProviderOutcome> {
    let calls = adapters.iter().map(|adapter| {
        let request = request_for(adapter);
        async move {
            let outcome = adapter.generate(&request).await;
            (adapter.name().clone(), outcome)
        }
    });
    join_all(calls).await.into_iter().collect()
}
