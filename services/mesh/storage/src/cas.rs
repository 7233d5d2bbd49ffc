//! Read-modify-CAS retry loops.
//!
//! [`compare_and_swap_loop`] is the single retry loop used for every
//! directory mutation; [`AtomicRef`] is the in-process counterpart for local
//! state that is replaced wholesale.

use crate::{Directory, StorageError};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Upper bound on CAS rounds before reporting contention
pub const MAX_CAS_ATTEMPTS: usize = 1024;

/// Apply `update` to the value under `key` until a compare-and-set wins.
///
/// `update` sees the current value and returns `Ok(Some(new))` to write,
/// `Ok(None)` to leave the entry untouched, or an error to abort without
/// writing. Returns the value stored once the loop finishes.
pub async fn compare_and_swap_loop<D, K, V, E, F>(directory: &D, key: &K, mut update: F) -> Result<Option<V>, E>
where
    D: Directory<K, V> + ?Sized,
    K: std::fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: From<StorageError>,
    F: FnMut(Option<&V>) -> Result<Option<V>, E> + Send,
{
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let current = directory.get(key).await?;
        let next = match update(current.as_ref())? {
            Some(next) => next,
            None => return Ok(current),
        };

        if directory.compare_and_set(key, current.as_ref(), next.clone()).await? {
            return Ok(Some(next));
        }

        debug!("CAS conflict on {} (attempt {}), retrying", key, attempt);
    }

    warn!("Giving up on {} after {} CAS rounds", key, MAX_CAS_ATTEMPTS);
    Err(StorageError::Contention {
        attempts: MAX_CAS_ATTEMPTS,
    }
    .into())
}

/// Atomically swapped shared value.
///
/// Readers get an `Arc` snapshot and never observe a partially built value.
#[derive(Debug)]
pub struct AtomicRef<T> {
    inner: RwLock<Arc<T>>,
}

impl<T> AtomicRef<T> {
    /// Create a reference holding `value`
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<T> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the value unconditionally
    pub fn store(&self, value: T) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(value);
    }

    /// Replace the value with `f(current)`, retrying if another writer swapped it meanwhile
    pub fn update<F>(&self, mut f: F) -> Arc<T>
    where
        F: FnMut(&T) -> T,
    {
        loop {
            let current = self.load();
            let next = Arc::new(f(&current));
            let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
            if Arc::ptr_eq(&guard, &current) {
                *guard = next.clone();
                return next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDirectory;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    enum TestError {
        Storage,
        Rejected,
    }

    impl From<StorageError> for TestError {
        fn from(_: StorageError) -> Self {
            TestError::Storage
        }
    }

    /// Directory whose first CAS always loses to a simulated concurrent writer
    struct RacyDirectory {
        inner: MemoryDirectory<String, u32>,
        raced: AtomicUsize,
    }

    #[async_trait]
    impl Directory<String, u32> for RacyDirectory {
        async fn get(&self, key: &String) -> Result<Option<u32>, StorageError> {
            self.inner.get(key).await
        }

        async fn compare_and_set(&self, key: &String, expected: Option<&u32>, new: u32) -> Result<bool, StorageError> {
            if self.raced.fetch_add(1, Ordering::SeqCst) == 0 {
                // Another writer bumps the value first
                let current = self.inner.get(key).await?;
                self.inner
                    .compare_and_set(key, current.as_ref(), current.unwrap_or(0) + 100)
                    .await?;
            }
            self.inner.compare_and_set(key, expected, new).await
        }

        async fn remove(&self, key: &String) -> Result<bool, StorageError> {
            self.inner.remove(key).await
        }

        async fn remove_if(&self, key: &String, expected: &u32) -> Result<bool, StorageError> {
            self.inner.remove_if(key, expected).await
        }

        async fn entries(&self) -> Result<Vec<(String, u32)>, StorageError> {
            self.inner.entries().await
        }
    }

    #[tokio::test]
    async fn test_loop_retries_on_conflict() {
        let dir = RacyDirectory {
            inner: MemoryDirectory::new(),
            raced: AtomicUsize::new(0),
        };
        let key = "counter".to_string();
        dir.inner.compare_and_set(&key, None, 1).await.unwrap();

        let mut seen = Vec::new();
        let stored = compare_and_swap_loop::<_, _, _, TestError, _>(&dir, &key, |current| {
            seen.push(current.copied());
            Ok(current.map(|v| v + 1))
        })
        .await
        .unwrap();

        // First round saw 1 and lost, second saw the concurrent 101
        assert_eq!(seen, vec![Some(1), Some(101)]);
        assert_eq!(stored, Some(102));
        assert_eq!(dir.get(&key).await.unwrap(), Some(102));
    }

    #[tokio::test]
    async fn test_loop_abort_does_not_write() {
        let dir: MemoryDirectory<String, u32> = MemoryDirectory::new();
        let key = "k".to_string();
        dir.compare_and_set(&key, None, 7).await.unwrap();

        let result = compare_and_swap_loop::<_, _, _, TestError, _>(&dir, &key, |_| Err(TestError::Rejected)).await;
        assert!(matches!(result, Err(TestError::Rejected)));
        assert_eq!(dir.get(&key).await.unwrap(), Some(7));

        let untouched = compare_and_swap_loop::<_, _, _, TestError, _>(&dir, &key, |_| Ok(None))
            .await
            .unwrap();
        assert_eq!(untouched, Some(7));
    }

    #[tokio::test]
    async fn test_concurrent_loops_converge() {
        let dir = Arc::new(MemoryDirectory::<String, u32>::new());
        let key = "n".to_string();
        dir.compare_and_set(&key, None, 0).await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let dir = dir.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    compare_and_swap_loop::<_, _, _, TestError, _>(dir.as_ref(), &key, |current| {
                        Ok(current.map(|v| v + 1))
                    })
                    .await
                    .is_ok()
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            assert!(result.unwrap());
        }
        assert_eq!(dir.get(&key).await.unwrap(), Some(16));
    }

    #[test]
    fn test_atomic_ref_update() {
        let r = AtomicRef::new(1u32);
        let before = r.load();
        let after = r.update(|v| v * 10);
        assert_eq!(*before, 1);
        assert_eq!(*after, 10);
        assert_eq!(*r.load(), 10);

        r.store(3);
        assert_eq!(*r.load(), 3);
    }
}
