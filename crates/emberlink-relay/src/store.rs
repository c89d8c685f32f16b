//! Session store abstraction.
//!
//! All session-lifecycle mutation — request handlers and the eviction sweep
//! alike — goes through [`SessionStore`], so the in-memory map can be
//! swapped for a sharded or actor-backed structure without touching the
//! driver. Single-writer-per-session semantics hold because the driver
//! processes one event to completion at a time and every mutation happens
//! inside one [`SessionStore::update`] call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use emberlink_proto::SessionId;

use crate::session::SessionState;

/// Errors from session store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Insert target already exists. Reservation conflicts surface as this.
    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),
}

/// Storage abstraction for session state.
///
/// Must be `Clone` (the driver and the sweep task hold handles to the same
/// store), `Send + Sync`, and synchronous — implementations share internal
/// state via `Arc`, so clones see the same sessions.
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned (a thread panicked while holding a lock).
pub trait SessionStore<I>: Clone + Send + Sync + 'static {
    /// Insert a new session.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AlreadyExists`] if the id is taken
    fn insert(&self, id: SessionId, state: SessionState<I>) -> Result<(), StoreError>;

    /// Whether a session exists.
    fn contains(&self, id: &SessionId) -> bool;

    /// Run `f` against a session's state, mutating in place.
    ///
    /// Returns `None` if the session does not exist. The closure runs under
    /// the store's internal lock; keep it free of I/O.
    fn update<R>(&self, id: &SessionId, f: impl FnOnce(&mut SessionState<I>) -> R) -> Option<R>;

    /// Remove a session, returning its final state.
    fn remove(&self, id: &SessionId) -> Option<SessionState<I>>;

    /// Ids of all live sessions. Order is not guaranteed.
    fn session_ids(&self) -> Vec<SessionId>;

    /// Number of live sessions.
    fn len(&self) -> usize;

    /// Whether no sessions exist.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory session store.
///
/// A `HashMap` behind `Arc<Mutex>`; the only store the relay ships, since
/// sessions are ephemeral by design and nothing survives the process.
#[derive(Clone)]
pub struct MemoryStore<I> {
    inner: Arc<Mutex<HashMap<SessionId, SessionState<I>>>>,
}

impl<I> MemoryStore<I> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<I> Default for MemoryStore<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Copy + Send + Sync + 'static> SessionStore<I> for MemoryStore<I> {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn insert(&self, id: SessionId, state: SessionState<I>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");

        if inner.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        inner.insert(id, state);
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn contains(&self, id: &SessionId) -> bool {
        self.inner.lock().expect("mutex poisoned").contains_key(id)
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn update<R>(&self, id: &SessionId, f: impl FnOnce(&mut SessionState<I>) -> R) -> Option<R> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        inner.get_mut(id).map(f)
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn remove(&self, id: &SessionId) -> Option<SessionState<I>> {
        self.inner.lock().expect("mutex poisoned").remove(id)
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn session_ids(&self) -> Vec<SessionId> {
        self.inner.lock().expect("mutex poisoned").keys().cloned().collect()
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn len(&self) -> usize {
        self.inner.lock().expect("mutex poisoned").len()
    }
}
