use std::future::Future;

use morph_protocol::{MorphResult, RunId, SessionId};
use morph_store::SessionStore;
use tokio::sync::oneshot;
use tracing::debug;

/// Spawn a background run whose abort handle is owned by the session.
///
/// The run does not start until its handle is attached, so a run that settles
/// instantly can never leave a stale handle behind. If the session vanished in
/// the meantime the run is aborted before doing any work.
pub(crate) fn spawn_supervised<F>(
    store: &SessionStore,
    session_id: &SessionId,
    run_id: &RunId,
    run: F,
) -> MorphResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (attached_tx, attached_rx) = oneshot::channel::<()>();
    let detach_store = store.clone();
    let detach_session = session_id.clone();
    let detach_run = run_id.clone();
    let handle = tokio::spawn(async move {
        if attached_rx.await.is_err() {
            return;
        }
        run.await;
        detach_store.detach_task(&detach_session, &detach_run);
        debug!(session_id = %detach_session, run_id = %detach_run, "background run finished");
    });
    store.attach_task(session_id, run_id.clone(), handle.abort_handle())?;
    // The receiver only drops if the task was aborted, which is fine to ignore.
    let _ = attached_tx.send(());
    Ok(())
}
