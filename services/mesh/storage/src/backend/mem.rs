//! In-memory directory backend for development and testing

use crate::{Directory, StorageError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// In-memory compare-and-set map
pub struct MemoryDirectory<K, V> {
    /// Stored entries, the shard lock makes each CAS atomic
    entries: Arc<DashMap<K, V>>,
}

impl<K, V> MemoryDirectory<K, V>
where
    K: Eq + Hash,
{
    /// Create a new empty directory
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Default for MemoryDirectory<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for MemoryDirectory<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

#[async_trait]
impl<K, V> Directory<K, V> for MemoryDirectory<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn compare_and_set(&self, key: &K, expected: Option<&V>, new: V) -> Result<bool, StorageError> {
        let won = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if expected == Some(occupied.get()) {
                    occupied.insert(new);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(new);
                    true
                } else {
                    false
                }
            }
        };

        debug!("Directory CAS key={} won={}", key, won);
        Ok(won)
    }

    async fn remove(&self, key: &K) -> Result<bool, StorageError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn remove_if(&self, key: &K, expected: &V) -> Result<bool, StorageError> {
        let removed = self.entries.remove_if(key, |_, current| current == expected).is_some();
        debug!("Directory remove_if key={} removed={}", key, removed);
        Ok(removed)
    }

    async fn entries(&self) -> Result<Vec<(K, V)>, StorageError> {
        Ok(self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compare_and_set_semantics() {
        let dir: MemoryDirectory<String, u32> = MemoryDirectory::new();
        let key = "a".to_string();

        // Insert only when absent
        assert!(dir.compare_and_set(&key, None, 1).await.unwrap());
        assert!(!dir.compare_and_set(&key, None, 2).await.unwrap());
        assert_eq!(dir.get(&key).await.unwrap(), Some(1));

        // Replace only when the expected value matches
        assert!(!dir.compare_and_set(&key, Some(&5), 2).await.unwrap());
        assert!(dir.compare_and_set(&key, Some(&1), 2).await.unwrap());
        assert_eq!(dir.get(&key).await.unwrap(), Some(2));

        // Expecting a value for an absent key fails
        let missing = "b".to_string();
        assert!(!dir.compare_and_set(&missing, Some(&1), 3).await.unwrap());
        assert_eq!(dir.get(&missing).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_if() {
        let dir: MemoryDirectory<String, u32> = MemoryDirectory::new();
        let key = "a".to_string();
        dir.compare_and_set(&key, None, 1).await.unwrap();

        assert!(!dir.remove_if(&key, &2).await.unwrap());
        assert_eq!(dir.len(), 1);
        assert!(dir.remove_if(&key, &1).await.unwrap());
        assert!(dir.is_empty());
        assert!(!dir.remove(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_snapshot() {
        let dir: MemoryDirectory<String, u32> = MemoryDirectory::new();
        for i in 0..3u32 {
            dir.compare_and_set(&format!("k{}", i), None, i).await.unwrap();
        }
        let mut entries = dir.entries().await.unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![("k0".to_string(), 0), ("k1".to_string(), 1), ("k2".to_string(), 2)]
        );
    }
}
