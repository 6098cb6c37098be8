//! In-memory TTL cache shared by every component
//!
//! Values are stored as [`serde_json::Value`] so a single cache instance can
//! hold scripts, social copy, topic lists and anything else that serializes.
//!
//! # Staleness
//!
//! An entry is returned by [`Cache::get`] only while `now - created_at < ttl`.
//! Expired entries are kept until they are replaced, purged, or handed out
//! once by [`Cache::wrap`] as a stale answer when regeneration fails.
//!
//! # Example
//!
//! ```rust,ignore
//! use reelforge::cache::Cache;
//!
//! let cache = Cache::new();
//! let key = Cache::hash_key("script", &[&theme, &audience]);
//! let cached = cache
//!     .wrap_typed(&key, Duration::from_secs(3600), || async { generate().await })
//!     .await?;
//! ```

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

use crate::utils::normalize_whitespace;

/// A single cached value with its creation time and TTL
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) < self.ttl
    }
}

/// How a value returned by [`Cache::wrap`] was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from a fresh entry
    Hit,
    /// Computed and stored
    Computed,
    /// Computation failed; an expired entry was served and evicted
    Stale,
}

/// Value plus the way it was obtained
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub outcome: CacheOutcome,
}

impl<T> Cached<T> {
    /// Whether the value did not come from a fresh computation
    pub fn from_cache(&self) -> bool {
        self.outcome != CacheOutcome::Computed
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fresh lookups
    pub hits: u64,
    /// Absent or expired lookups
    pub misses: u64,
    /// Expired entries served after a failed regeneration
    pub stale_served: u64,
    /// Entries currently held (fresh or expired)
    pub entries: usize,
}

impl CacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-memory TTL key-value store
#[derive(Debug, Default)]
pub struct Cache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
}

impl Cache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Key Generation
    // =========================================================================

    /// Derive a cache key from the semantically relevant fields of a request
    ///
    /// Fields are trimmed, lowercased and whitespace-collapsed before hashing so
    /// that cosmetic differences in the same theme share one entry.
    pub fn hash_key(namespace: &str, fields: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update(normalize_whitespace(field).to_lowercase().as_bytes());
            hasher.update([0x1f]);
        }
        format!("{namespace}:{:x}", hasher.finalize())
    }

    // =========================================================================
    // Basic Operations
    // =========================================================================

    /// Get a fresh value
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let found = self
            .read_entries()
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone());

        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_lookup("hit");
                tracing::debug!(key = %key, "Cache hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_lookup("miss");
                tracing::debug!(key = %key, "Cache miss");
                None
            }
        }
    }

    /// Get a fresh value and deserialize it
    ///
    /// An entry that does not deserialize into `T` is treated as a miss.
    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Store a value; the TTL is fixed for the entry's lifetime
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            ttl,
        };
        self.write_entries().insert(key.to_string(), entry);
    }

    /// Remove an entry, returning its value if present
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write_entries().remove(key).map(|entry| entry.value)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write_entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            entries: self.read_entries().len(),
        }
    }

    // =========================================================================
    // Compute-if-absent
    // =========================================================================

    /// Return the fresh value for `key`, or compute, store and return it
    ///
    /// If `compute` fails and an expired entry exists, that entry is returned
    /// once with [`CacheOutcome::Stale`] and evicted. Otherwise the error is
    /// propagated.
    pub async fn wrap<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Cached<Value>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        self.wrap_typed(key, ttl, compute).await
    }

    /// Typed variant of [`Cache::wrap`]
    pub async fn wrap_typed<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get_typed::<T>(key) {
            return Ok(Cached {
                value,
                outcome: CacheOutcome::Hit,
            });
        }

        match compute().await {
            Ok(value) => {
                match serde_json::to_value(&value) {
                    Ok(json) => self.set(key, json, ttl),
                    Err(e) => tracing::warn!(key = %key, error = %e, "Value not cacheable"),
                }
                Ok(Cached {
                    value,
                    outcome: CacheOutcome::Computed,
                })
            }
            Err(err) => match self
                .take_stale(key)
                .and_then(|stale| serde_json::from_value::<T>(stale).ok())
            {
                Some(value) => {
                    self.stale_served.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_cache_lookup("stale");
                    tracing::warn!(key = %key, "Regeneration failed, serving stale entry");
                    Ok(Cached {
                        value,
                        outcome: CacheOutcome::Stale,
                    })
                }
                None => Err(err),
            },
        }
    }

    /// Remove and return an expired entry; fresh entries are left alone
    fn take_stale(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut entries = self.write_entries();
        match entries.get(key) {
            Some(entry) if !entry.is_fresh(now) => entries.remove(key).map(|entry| entry.value),
            _ => None,
        }
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
