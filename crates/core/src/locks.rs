//! Per-key async mutual exclusion
//!
//! Serializes work on one appointment (or one connection's credentials)
//! while leaving unrelated keys fully parallel. Entries are dropped from the
//! table once nobody holds or waits on them.

use std::sync::Arc;
use std::time::Duration;

use calsync_domain::{CalSyncError, Result};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Table of named async locks.
#[derive(Debug, Default, Clone)]
pub struct KeyedLocks {
    table: Arc<LockTable>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, giving up after `wait`.
    ///
    /// A timeout maps to [`CalSyncError::Timeout`], which the retry queue
    /// treats as transient.
    pub async fn acquire(&self, key: &str, wait: Duration) -> Result<KeyedGuard> {
        let mutex = self
            .table
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        match tokio::time::timeout(wait, mutex.lock_owned()).await {
            Ok(guard) => Ok(KeyedGuard {
                guard: Some(guard),
                key: key.to_string(),
                table: Arc::clone(&self.table),
            }),
            Err(_) => {
                self.prune(key);
                Err(CalSyncError::Timeout(format!(
                    "lock for {key} not acquired within {}ms",
                    wait.as_millis()
                )))
            }
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn prune(&self, key: &str) {
        prune(&self.table, key);
    }
}

fn prune(table: &LockTable, key: &str) {
    table.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
}

/// Held lock; releases and prunes on drop.
#[derive(Debug)]
pub struct KeyedGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    table: Arc<LockTable>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.table, &self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("appt-1", Duration::from_secs(5)).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire("appt-a", Duration::from_millis(50)).await.unwrap();
        let _b = locks.acquire("appt-b", Duration::from_millis(50)).await.unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn acquire_times_out_while_held() {
        let locks = KeyedLocks::new();
        let _held = locks.acquire("appt-1", Duration::from_millis(50)).await.unwrap();

        let err = locks.acquire("appt-1", Duration::from_millis(20)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(locks.len(), 1);
    }
}
