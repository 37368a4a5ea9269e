//! In-process coordination service.
//!
//! Sessions opened on the same `MemoryCoordinator` contend for named locks exactly
//! like replicas contending on a shared coordination service. A single instance uses
//! one session and always wins; tests open several to exercise failover.

use super::{Acquisition, CoordinationLock, LockEvent};
use crate::error::{LagwatchError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 16;

#[derive(Default)]
struct LockEntry {
    holder: Option<u64>,
    sessions: HashMap<u64, (String, broadcast::Sender<LockEvent>)>,
}

#[derive(Default)]
struct CoordinatorState {
    locks: HashMap<String, LockEntry>,
    next_session: u64,
}

#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    state: Arc<Mutex<CoordinatorState>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session watching the lock at `path`.
    pub fn connect(&self, path: &str, identity: impl Into<String>) -> MemoryLock {
        let identity = identity.into();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut state = lock_state(&self.state);
        state.next_session += 1;
        let session = state.next_session;
        state
            .locks
            .entry(path.to_string())
            .or_default()
            .sessions
            .insert(session, (identity.clone(), events.clone()));

        MemoryLock {
            state: Arc::clone(&self.state),
            path: path.to_string(),
            session,
            identity,
            events,
            closed: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    /// Identity of the session holding `path`, if any.
    pub fn holder(&self, path: &str) -> Option<String> {
        let state = lock_state(&self.state);
        let entry = state.locks.get(path)?;
        let holder = entry.holder?;
        entry.sessions.get(&holder).map(|(identity, _)| identity.clone())
    }
}

fn lock_state(state: &Mutex<CoordinatorState>) -> MutexGuard<'_, CoordinatorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One session's handle on a named lock.
pub struct MemoryLock {
    state: Arc<Mutex<CoordinatorState>>,
    path: String,
    session: u64,
    identity: String,
    events: broadcast::Sender<LockEvent>,
    closed: AtomicBool,
}

impl MemoryLock {
    /// Drop this session's hold and tell the other sessions the lock is free.
    fn release_hold(&self, entry: &mut LockEntry) {
        if entry.holder != Some(self.session) {
            return;
        }
        entry.holder = None;
        for (id, (_, events)) in &entry.sessions {
            if *id != self.session {
                let _ = events.send(LockEvent::Released);
            }
        }
        debug!(lock = %self.path, identity = %self.identity, "Lock released");
    }

    #[cfg(test)]
    /// Simulate the coordination service expiring this session.
    pub fn expire_session(&self) {
        let mut state = lock_state(&self.state);
        if let Some(entry) = state.locks.get_mut(&self.path) {
            self.release_hold(entry);
        }
        let _ = self.events.send(LockEvent::SessionLost);
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = lock_state(&self.state);
        if let Some(entry) = state.locks.get_mut(&self.path) {
            self.release_hold(entry);
            entry.sessions.remove(&self.session);
        }
        let _ = self.events.send(LockEvent::SessionLost);
    }
}

#[async_trait::async_trait]
impl CoordinationLock for MemoryLock {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn acquire(&self) -> Result<Acquisition> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LagwatchError::Coordination("session closed".to_string()));
        }

        let mut state = lock_state(&self.state);
        let entry = state.locks.entry(self.path.clone()).or_default();
        match entry.holder {
            None => {
                entry.holder = Some(self.session);
                Ok(Acquisition::Acquired)
            }
            Some(holder) if holder == self.session => Ok(Acquisition::Acquired),
            Some(_) => Ok(Acquisition::HeldElsewhere),
        }
    }

    async fn release(&self) -> Result<()> {
        let mut state = lock_state(&self.state);
        if let Some(entry) = state.locks.get_mut(&self.path) {
            self.release_hold(entry);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        self.shutdown();
    }
}
