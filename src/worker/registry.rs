use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Identifies a registered session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// Every session currently open across the pool.
///
/// A session is represented by its close token: cancelling it makes the
/// owning worker abandon whatever I/O it is blocked on and drop the session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, CancellationToken>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly opened session.
    ///
    /// After `close_all` the registry refuses new sessions by closing them
    /// right away, so a worker racing the shutdown cannot leak one.
    pub fn register(&self, close: CancellationToken) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut sessions = self.lock();
        if self.closed.load(Ordering::Acquire) {
            close.cancel();
        } else {
            sessions.insert(id, close);
        }
        id
    }

    pub fn unregister(&self, id: SessionId) {
        self.lock().remove(&id);
    }

    /// Close every registered session and return how many were closed.
    ///
    /// Sessions are drained under the lock, so concurrent callers never
    /// close the same session twice.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut sessions = self.lock();
            self.closed.store(true, Ordering::Release);
            sessions.drain().map(|(_, close)| close).collect()
        };
        for close in &drained {
            close.cancel();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, CancellationToken>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
