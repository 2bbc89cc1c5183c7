//! Process-wide session store.
//!
//! Sessions live in a map guarded by a read/write lock; each session sits behind
//! its own mutex so concurrent provider and iteration tasks can update the same
//! session without racing on the nested maps, while different sessions never
//! contend. Readers always receive a snapshot of the latest committed write.
//!
//! The store also owns the abort handle of the background run attached to a
//! session, so a run outlives the request that started it and dies with the
//! session that owns it.

use std::collections::HashMap;
use std::sync::Arc;

use morph_protocol::{MorphError, MorphResult, RunId, Session, SessionId, SourceAsset};
use parking_lot::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info};

#[derive(Debug)]
struct SupervisedTask {
    run_id: RunId,
    handle: AbortHandle,
}

#[derive(Debug)]
struct SessionSlot {
    session: Mutex<Session>,
    task: Mutex<Option<SupervisedTask>>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<SessionSlot>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, source: SourceAsset) -> Session {
        let session = Session::new(source);
        let slot = Arc::new(SessionSlot {
            session: Mutex::new(session.clone()),
            task: Mutex::new(None),
        });
        self.sessions.write().insert(session.id.clone(), slot);
        info!(session_id = %session.id, asset = %session.source.asset_ref, "session created");
        session
    }

    fn slot(&self, session_id: &SessionId) -> MorphResult<Arc<SessionSlot>> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| MorphError::SessionNotFound(session_id.clone()))
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        let slot = self.slot(session_id).ok()?;
        let session = slot.session.lock().clone();
        Some(session)
    }

    /// Project a session without cloning all of it.
    pub fn read<R>(&self, session_id: &SessionId, view: impl FnOnce(&Session) -> R) -> MorphResult<R> {
        let slot = self.slot(session_id)?;
        let session = slot.session.lock();
        Ok(view(&session))
    }

    pub fn update<R>(
        &self,
        session_id: &SessionId,
        mutate: impl FnOnce(&mut Session) -> R,
    ) -> MorphResult<R> {
        let slot = self.slot(session_id)?;
        let mut session = slot.session.lock();
        Ok(mutate(&mut session))
    }

    /// Atomic check-and-set: the closure sees and mutates the session under one lock.
    pub fn try_update<R>(
        &self,
        session_id: &SessionId,
        mutate: impl FnOnce(&mut Session) -> MorphResult<R>,
    ) -> MorphResult<R> {
        let slot = self.slot(session_id)?;
        let mut session = slot.session.lock();
        mutate(&mut session)
    }

    pub fn snapshots(&self) -> Vec<Session> {
        let slots: Vec<Arc<SessionSlot>> = self.sessions.read().values().cloned().collect();
        slots
            .iter()
            .map(|slot| slot.session.lock().clone())
            .collect()
    }

    /// Remove a session and abort its background run, if any.
    pub fn remove(&self, session_id: &SessionId) -> Option<Session> {
        let slot = self.sessions.write().remove(session_id)?;
        if let Some(task) = slot.task.lock().take() {
            task.handle.abort();
            info!(session_id = %session_id, run_id = %task.run_id, "background run aborted");
        }
        let session = slot.session.lock().clone();
        info!(session_id = %session_id, "session removed");
        Some(session)
    }

    /// Keep the handle of the background run executing `run_id` for this session.
    pub fn attach_task(
        &self,
        session_id: &SessionId,
        run_id: RunId,
        handle: AbortHandle,
    ) -> MorphResult<()> {
        let slot = match self.slot(session_id) {
            Ok(slot) => slot,
            Err(error) => {
                handle.abort();
                return Err(error);
            }
        };
        let previous = slot.task.lock().replace(SupervisedTask { run_id, handle });
        if let Some(previous) = previous {
            debug!(session_id = %session_id, run_id = %previous.run_id, "released finished run handle");
        }
        Ok(())
    }

    /// Drop the handle once the run has settled; ignores handles of other runs.
    pub fn detach_task(&self, session_id: &SessionId, run_id: &RunId) {
        let Ok(slot) = self.slot(session_id) else {
            return;
        };
        let mut task = slot.task.lock();
        if task.as_ref().is_some_and(|task| &task.run_id == run_id) {
            task.take();
        }
    }

    pub fn has_task(&self, session_id: &SessionId) -> bool {
        let Ok(slot) = self.slot(session_id) else {
            return false;
        };
        let attached = slot.task.lock().is_some();
        attached
    }
}
