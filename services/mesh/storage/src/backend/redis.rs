//! Redis directory backend
//!
//! Each entry is stored as a JSON `[key, value]` envelope under
//! `<prefix>:<json key>`. Compare-and-set runs as a Lua script so the comparison
//! and the write happen atomically on the server.

use crate::{Directory, DirectoryKey, DirectoryValue, StorageError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '0' then
  if current then return 0 end
else
  if current ~= ARGV[2] then return 0 end
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
"#;

const REMOVE_IF_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Directory stored in Redis
pub struct RedisDirectory<K, V> {
    conn: ConnectionManager,
    prefix: String,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> RedisDirectory<K, V>
where
    K: DirectoryKey,
    V: DirectoryValue,
{
    /// Connect to Redis at `url`, storing keys under `prefix`
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url).map_err(backend_error)?;
        let conn = ConnectionManager::new(client).await.map_err(backend_error)?;
        info!("Connected Redis directory at {} (prefix: {})", url, prefix);
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            _marker: PhantomData,
        })
    }

    /// Redis key for `key`; JSON keeps distinct keys apart where `Display` may not
    fn key_name(prefix: &str, key: &K) -> Result<String, StorageError> {
        Ok(format!("{}:{}", prefix, serde_json::to_string(key)?))
    }

    fn envelope(key: &K, value: &V) -> Result<String, StorageError> {
        Ok(serde_json::to_string(&(key, value))?)
    }

    fn open(raw: &str) -> Result<(K, V), StorageError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Value of an envelope read for `key`, refusing one written for another key
    fn value_for(key: &K, raw: &str) -> Result<V, StorageError> {
        let (stored, value) = Self::open(raw)?;
        if stored != *key {
            return Err(StorageError::Invalid(format!(
                "entry for {} holds the value of {}",
                key, stored
            )));
        }
        Ok(value)
    }
}

fn backend_error(e: redis::RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[async_trait]
impl<K, V> Directory<K, V> for RedisDirectory<K, V>
where
    K: DirectoryKey,
    V: DirectoryValue,
{
    async fn get(&self, key: &K) -> Result<Option<V>, StorageError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::key_name(&self.prefix, key)?)
            .await
            .map_err(backend_error)?;
        raw.map(|r| Self::value_for(key, &r)).transpose()
    }

    async fn compare_and_set(&self, key: &K, expected: Option<&V>, new: V) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let (flag, expected_raw) = match expected {
            Some(v) => ("1", Self::envelope(key, v)?),
            None => ("0", String::new()),
        };
        let won: i32 = redis::Script::new(CAS_SCRIPT)
            .key(Self::key_name(&self.prefix, key)?)
            .arg(flag)
            .arg(expected_raw)
            .arg(Self::envelope(key, &new)?)
            .invoke_async(&mut conn)
            .await
            .map_err(backend_error)?;

        debug!("Redis CAS key={} won={}", key, won == 1);
        Ok(won == 1)
    }

    async fn remove(&self, key: &K) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let removed: i32 = conn.del(Self::key_name(&self.prefix, key)?).await.map_err(backend_error)?;
        Ok(removed > 0)
    }

    async fn remove_if(&self, key: &K, expected: &V) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let removed: i32 = redis::Script::new(REMOVE_IF_SCRIPT)
            .key(Self::key_name(&self.prefix, key)?)
            .arg(Self::envelope(key, expected)?)
            .invoke_async(&mut conn)
            .await
            .map_err(backend_error)?;
        Ok(removed > 0)
    }

    async fn entries(&self) -> Result<Vec<(K, V)>, StorageError> {
        let mut conn = self.conn.clone();
        let names: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}:*", self.prefix))
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            // Entries removed between KEYS and GET are skipped
            let raw: Option<String> = conn.get(&name).await.map_err(backend_error)?;
            let Some(raw) = raw else { continue };
            let (key, value) = Self::open(&raw)?;
            if Self::key_name(&self.prefix, &key)? != name {
                warn!("Skipping Redis entry {} holding key {}", name, key);
                continue;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }
}
