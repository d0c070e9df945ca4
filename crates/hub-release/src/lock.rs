//! Per-release-name mutual exclusion
//!
//! Entries are created on first use and never evicted, so the table grows
//! with the number of distinct release names seen by the process.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard held for the duration of one release operation
pub type ReleaseGuard = OwnedMutexGuard<()>;

/// Lock table keyed by release name, owned by the composition root
#[derive(Debug, Default)]
pub struct ReleaseLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ReleaseLocks {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    ///
    /// The lock is released when the returned guard is dropped, on every
    /// exit path of the caller.
    pub async fn acquire(&self, name: &str) -> ReleaseGuard {
        let lock = Arc::clone(&self.locks.entry(name.to_string()).or_default());
        lock.lock_owned().await
    }

    /// Number of release names with a lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock has been created yet
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_name_is_serialized() {
        let locks = Arc::new(ReleaseLocks::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                tokio::spawn(async move {
                    let _guard = locks.acquire("foobar").await;
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn distinct_names_do_not_block() {
        let locks = ReleaseLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn dropping_guard_releases_lock() {
        let locks = ReleaseLocks::new();
        drop(locks.acquire("a").await);
        let again = tokio::time::timeout(Duration::from_millis(100), locks.acquire("a")).await;
        assert!(again.is_ok());
    }
}
