use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Table of named locks, one mutex per key, created on first use.
///
/// Keys are never removed: the set of live keys is bounded by the set of
/// project names seen on an index, and a stale mutex is cheap.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Mutex for `key`, creating it if this is the first request.
    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(key) {
            return Arc::clone(&lock);
        }
        Arc::clone(
            &self
                .locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Whether the mutex for `key` is currently held, without blocking.
    ///
    /// A key that has never been requested is not held.
    pub fn is_locked(&self, key: &str) -> bool {
        match self.locks.get(key) {
            Some(lock) => lock.try_lock().is_err(),
            None => false,
        }
    }
}
