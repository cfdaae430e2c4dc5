use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Short-lived string cache. Never a source of truth.
#[async_trait]
pub(crate) trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

pub(crate) fn score_key(test_id: &str, student_id: &str) -> String {
    format!("score:{test_id}:{student_id}")
}

pub(crate) fn stats_key(test_id: &str) -> String {
    format!("stats:{test_id}")
}

/// Reads and decodes a cached value. Backend or decode failures count as a miss.
pub(crate) async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    let raw = match cache.get(key).await {
        Ok(raw) => raw?,
        Err(err) => {
            tracing::warn!(error = %err, key, "cache read failed");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(error = %err, key, "dropping undecodable cache entry");
            if let Err(err) = cache.delete(key).await {
                tracing::warn!(error = %err, key, "cache delete failed");
            }
            None
        }
    }
}

pub(crate) async fn put_json<T: Serialize>(cache: &dyn Cache, key: &str, value: &T, ttl: Duration) {
    let result = match serde_json::to_string(value) {
        Ok(raw) => cache.set(key, raw, ttl).await,
        Err(err) => Err(CacheError::from(err)),
    };
    if let Err(err) = result {
        tracing::warn!(error = %err, key, "cache write failed");
    }
}

/// Fire-and-forget delete. Callers issue this after the write it follows has committed.
pub(crate) async fn invalidate(cache: &dyn Cache, keys: &[String]) {
    for key in keys {
        if let Err(err) = cache.delete(key).await {
            tracing::warn!(error = %err, key = %key, "cache invalidation failed");
        }
    }
}

/// In-process cache for single-node deployments and tests.
#[derive(Default)]
pub(crate) struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>, CacheError> {
        self.entries.lock().map_err(|_| CacheError::Backend("memory cache poisoned".to_string()))
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
