//! Lease directories for mesh: async compare-and-set maps with pluggable backends.
//!
//! Both the node directory and the addressable directory are instances of
//! [`Directory`]. Every mutation goes through optimistic compare-and-set, so
//! callers read a value, compute its replacement and retry when another
//! writer got there first (see [`cas::compare_and_swap_loop`]). Backends:
//! an in-process [`MemoryDirectory`] for development and tests, and a Redis
//! adapter behind the `redis-backend` feature.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cas;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Invalid operation
    #[error("Invalid operation: {0}")]
    Invalid(String),
    /// Backend-specific error
    #[error("Backend error: {0}")]
    Backend(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A compare-and-set loop never won a round
    #[error("Contention: gave up after {attempts} compare-and-set rounds")]
    Contention {
        /// Rounds attempted
        attempts: usize,
    },
}

/// Async key/value map with optimistic compare-and-set.
///
/// Any backend must honor CAS exactly: a write succeeds only when the stored
/// value still equals the expected one (or is absent when `None` is expected).
#[async_trait]
pub trait Directory<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Read the value stored under `key`
    async fn get(&self, key: &K) -> Result<Option<V>, StorageError>;

    /// Store `new` under `key` if the current value equals `expected`
    async fn compare_and_set(&self, key: &K, expected: Option<&V>, new: V) -> Result<bool, StorageError>;

    /// Remove `key` unconditionally, returns whether it existed
    async fn remove(&self, key: &K) -> Result<bool, StorageError>;

    /// Remove `key` only if the current value equals `expected`
    async fn remove_if(&self, key: &K, expected: &V) -> Result<bool, StorageError>;

    /// Snapshot of all entries
    async fn entries(&self) -> Result<Vec<(K, V)>, StorageError>;
}

/// Keys storable in any backend
pub trait DirectoryKey: Eq + Hash + Clone + Display + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> DirectoryKey for T where T: Eq + Hash + Clone + Display + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Values storable in any backend
pub trait DirectoryValue: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> DirectoryValue for T where T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Directory backend configuration
#[derive(Clone, Debug, Default)]
pub enum DirectoryMode {
    /// In-memory map (dev/tests only, not shared across processes)
    #[default]
    InMemory,
    /// Redis as the shared consistent store
    Redis {
        /// Redis connection URL
        url: String,
        /// Key prefix separating directories
        prefix: String,
    },
}

// Re-export backend implementations
pub use backend::mem::MemoryDirectory;
#[cfg(feature = "redis-backend")]
pub use backend::redis::RedisDirectory;
pub use cas::{compare_and_swap_loop, AtomicRef, MAX_CAS_ATTEMPTS};

/// Open a directory from configuration
pub async fn open_directory<K, V>(mode: DirectoryMode) -> Result<Arc<dyn Directory<K, V>>, StorageError>
where
    K: DirectoryKey,
    V: DirectoryValue,
{
    match mode {
        DirectoryMode::InMemory => Ok(Arc::new(MemoryDirectory::<K, V>::new())),
        #[cfg(feature = "redis-backend")]
        DirectoryMode::Redis { url, prefix } => Ok(Arc::new(RedisDirectory::<K, V>::connect(&url, &prefix).await?)),
        #[cfg(not(feature = "redis-backend"))]
        DirectoryMode::Redis { .. } => Err(StorageError::Invalid(
            "Redis directory requested but built without the redis-backend feature".to_string(),
        )),
    }
}
