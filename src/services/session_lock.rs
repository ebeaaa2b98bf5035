use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed async mutex linearizing work on a single upload session.
///
/// Entries are created on demand and evicted when the last holder releases
/// a lock nobody else is waiting on.
#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `session_id` is free and take it.
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        // The map guard must be gone before awaiting the mutex.
        let mutex = Arc::clone(&*self.locks.entry(session_id.to_owned()).or_default());
        let guard = mutex.lock_owned().await;
        SessionGuard {
            locks: Arc::clone(&self.locks),
            session_id: session_id.to_owned(),
            guard: Some(guard),
        }
    }

    /// Number of sessions currently tracked.
    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

/// Held lock for one session; releases on drop.
#[derive(Debug)]
pub struct SessionGuard {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still references the mutex: no waiters left.
        self.locks
            .remove_if(&self.session_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
