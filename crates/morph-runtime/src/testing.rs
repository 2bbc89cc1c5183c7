use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use morph_protocol::{AssetRef, ProviderKind, Session, SessionId, SourceAsset};
use morph_providers::{ProviderAdapter, ProviderProfile, SimulatedBehavior, SimulatedProvider};
use morph_store::SessionStore;

pub(crate) fn source() -> SourceAsset {
    SourceAsset::new(AssetRef::from("uploads/portrait.jpg"), Some("portrait.jpg".into()))
}

pub(crate) fn adapter(
    name: &str,
    behavior: SimulatedBehavior,
) -> (ProviderAdapter, Arc<SimulatedProvider>) {
    simulated_adapter(name, SimulatedProvider::new(behavior))
}

pub(crate) fn simulated_adapter(
    name: &str,
    provider: SimulatedProvider,
) -> (ProviderAdapter, Arc<SimulatedProvider>) {
    let provider = Arc::new(provider);
    let adapter = ProviderAdapter::new(
        ProviderProfile::new(name, ProviderKind::ImageConditioned).timeout(Duration::from_secs(30)),
        provider.clone(),
    );
    (adapter, provider)
}

/// Poll the store until `done` holds for the session, bounded by a timeout.
pub(crate) async fn wait_for(
    store: &SessionStore,
    session_id: &SessionId,
    done: impl Fn(&Session) -> bool,
) -> Result<Session> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let session = store.get(session_id).context("session disappeared")?;
            if done(&session) {
                return anyhow::Ok(session);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("timed out waiting for session state")?
}
