//! Content-addressed TTL cache.
//!
//! Every call to a monitoring source or the reasoning service is keyed by a
//! hash of its canonical-JSON payload and memoized with a per-namespace TTL.
//! The store is handed to the pipeline as an injected handle so tests can
//! substitute an in-memory fake.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Backing store contract: get/set/sweep. Entries past expiry are absent.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: &Value, ttl_secs: i64) -> Result<()>;
    /// Remove expired rows; returns how many were deleted.
    fn sweep_expired(&self) -> Result<u64>;
}

/// Build a cache key from a namespace and a JSON payload.
///
/// serde_json serializes maps with sorted keys (BTreeMap-backed), so equal
/// payloads always hash identically regardless of construction order.
pub fn cache_key(namespace: &str, payload: &Value) -> String {
    let raw = payload.to_string();
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"|");
    hasher.update(raw.as_bytes());
    format!("{}:{}", namespace, hex::encode(hasher.finalize()))
}

/// Wrap an async call with the cache: on hit return the stored value, on
/// miss run the call and store its result with a fresh TTL.
///
/// Store errors degrade to a miss; the call itself is never blocked by a
/// broken cache.
pub async fn cached<F, Fut>(
    store: &dyn CacheStore,
    namespace: &str,
    payload: &Value,
    ttl_secs: i64,
    call: F,
) -> Value
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Value>,
{
    let key = cache_key(namespace, payload);
    match store.get(&key) {
        Ok(Some(hit)) => {
            debug!(namespace, "cache hit");
            return hit;
        }
        Ok(None) => {}
        Err(e) => warn!(namespace, error = %e, "cache read failed, treating as miss"),
    }

    let value = call().await;
    if let Err(e) = store.set(&key, &value, ttl_secs) {
        warn!(namespace, error = %e, "cache write failed");
    }
    value
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// SQLite-backed store
// ---------------------------------------------------------------------------

/// SQLite-backed TTL cache with a single `cache(k, v, exp)` table.
pub struct SqliteCache {
    pool: Pool,
}

impl SqliteCache {
    /// Open (or create) the cache database at `path`, creating parent
    /// directories as needed.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(path).with_init(|c| {
            c.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )
        });
        let pool = R2D2Pool::new(manager)?;
        let conn = pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache (
                k TEXT PRIMARY KEY,
                v TEXT NOT NULL,
                exp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cache_exp ON cache(exp);",
        )?;
        Ok(Self { pool })
    }
}

impl CacheStore for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.pool.get()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT v, exp FROM cache WHERE k = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match row {
            Some((v, exp)) if exp >= now_epoch() => Ok(Some(serde_json::from_str(&v)?)),
            Some(_) => {
                // Expired rows are treated as absent and removed eagerly.
                conn.execute("DELETE FROM cache WHERE k = ?1", [key])?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value, ttl_secs: i64) -> Result<()> {
        let conn = self.pool.get()?;
        let exp = now_epoch() + ttl_secs;
        conn.execute(
            "INSERT INTO cache(k, v, exp) VALUES (?1, ?2, ?3)
             ON CONFLICT(k) DO UPDATE SET v = excluded.v, exp = excluded.exp",
            rusqlite::params![key, value.to_string(), exp],
        )?;
        Ok(())
    }

    fn sweep_expired(&self) -> Result<u64> {
        let conn = self.pool.get()?;
        let deleted = conn.execute("DELETE FROM cache WHERE exp < ?1", [now_epoch()])?;
        Ok(deleted as u64)
    }
}

// ---------------------------------------------------------------------------
// In-memory store (tests, demo runs)
// ---------------------------------------------------------------------------

/// In-memory store with the same expiry semantics as `SqliteCache`.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Value, i64)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((v, exp)) if *exp >= now_epoch() => Ok(Some(v.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value, ttl_secs: i64) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), (value.clone(), now_epoch() + ttl_secs));
        Ok(())
    }

    fn sweep_expired(&self) -> Result<u64> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        let now = now_epoch();
        entries.retain(|_, (_, exp)| *exp >= now);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_stable_across_field_order() {
        let a = json!({"method": "problem.get", "params": {"limit": 100, "recent": true}});
        let b = json!({"params": {"recent": true, "limit": 100}, "method": "problem.get"});
        assert_eq!(cache_key("zbx", &a), cache_key("zbx", &b));
    }

    #[test]
    fn test_key_differs_by_namespace() {
        let payload = json!({"q": 1});
        assert_ne!(cache_key("zbx", &payload), cache_key("llm", &payload));
    }

    #[test]
    fn test_memory_roundtrip_and_expiry() {
        let cache = MemoryCache::new();
        cache.set("k1", &json!({"x": 1}), 60).unwrap();
        assert_eq!(cache.get("k1").unwrap(), Some(json!({"x": 1})));

        // Already-expired entry reads as absent.
        cache.set("k2", &json!(2), -1).unwrap();
        assert_eq!(cache.get("k2").unwrap(), None);
    }

    #[test]
    fn test_memory_overwrite_wins() {
        let cache = MemoryCache::new();
        cache.set("k", &json!(1), 60).unwrap();
        cache.set("k", &json!(2), 60).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_sqlite_roundtrip_sweep() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let cache = SqliteCache::open(path.to_str().unwrap()).unwrap();

        cache.set("live", &json!({"a": [1, 2]}), 300).unwrap();
        cache.set("dead", &json!("stale"), -10).unwrap();

        assert_eq!(cache.get("live").unwrap(), Some(json!({"a": [1, 2]})));
        assert_eq!(cache.get("dead").unwrap(), None);

        // "dead" was already deleted on read; sweep finds nothing further.
        assert_eq!(cache.sweep_expired().unwrap(), 0);

        cache.set("dead2", &json!(0), -10).unwrap();
        assert_eq!(cache.sweep_expired().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cached_skips_call_on_hit() {
        let cache = MemoryCache::new();
        let payload = json!({"stage": "collect"});

        let first = cached(&cache, "llm", &payload, 60, || async { json!({"n": 1}) }).await;
        assert_eq!(first, json!({"n": 1}));

        // Second call must come from the cache, not the closure.
        let second = cached(&cache, "llm", &payload, 60, || async { json!({"n": 2}) }).await;
        assert_eq!(second, json!({"n": 1}));
    }
}
