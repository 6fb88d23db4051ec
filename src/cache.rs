//! In-memory response cache shared by every mounted screen.
//!
//! Entries are keyed by [`CacheKey`] and carry the time they were last
//! written. The cache tracks an approximate byte size per entry and keeps the
//! running total under a budget by evicting the oldest-written entries first
//! (write order, not read order). Staleness is decided by readers: a stale
//! entry stays stored until it is overwritten or evicted.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::CacheError;
use crate::types::{CacheKey, DataSets};

/// Default byte budget (500 MiB).
pub const DEFAULT_BUDGET_BYTES: u64 = 500 * 1024 * 1024;

/// Default time-to-live for reads (25 minutes).
pub const DEFAULT_TTL_MINUTES: i64 = 25;

/// A cached batch result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub timestamp: DateTime<Utc>,
    pub data_sets: DataSets,
    pub size_bytes: u64,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) < ttl
    }
}

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub budget_bytes: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    current_total: u64,
}

impl CacheInner {
    /// Evict other entries, oldest write first, until `new_size` fits.
    fn enforce_limit(&mut self, new_size: u64, exclude_key: &CacheKey, budget: u64) -> Vec<CacheKey> {
        if self.current_total + new_size <= budget {
            return Vec::new();
        }

        let mut candidates: Vec<(DateTime<Utc>, CacheKey)> = self
            .entries
            .iter()
            .filter(|(key, _)| *key != exclude_key)
            .map(|(key, entry)| (entry.timestamp, key.clone()))
            .collect();
        candidates.sort();

        let mut evicted = Vec::new();
        for (_, key) in candidates {
            if self.current_total + new_size <= budget {
                break;
            }
            if let Some(entry) = self.entries.remove(&key) {
                self.current_total -= entry.size_bytes;
                evicted.push(key);
            }
        }
        evicted
    }
}

/// Byte-budgeted store of batch results.
///
/// All mutation happens under one lock, so the read-check-evict-write
/// sequence of [`ResponseCache::put`] is atomic with respect to other screens.
pub struct ResponseCache {
    budget_bytes: u64,
    inner: Mutex<CacheInner>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET_BYTES)
    }
}

impl ResponseCache {
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            budget_bytes,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    /// Look up an entry regardless of age.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Look up an entry younger than `ttl`; stale entries read as misses.
    pub fn get_fresh(&self, key: &CacheKey, now: DateTime<Utc>, ttl: Duration) -> Option<CacheEntry> {
        self.get(key).filter(|entry| entry.is_fresh(now, ttl))
    }

    /// Store `data_sets` under `key`, stamped with the current time.
    pub fn put(&self, key: &CacheKey, data_sets: &DataSets) -> Result<(), CacheError> {
        self.put_at(key, data_sets, Utc::now())
    }

    /// Store `data_sets` under `key`, stamped with `now`.
    pub fn put_at(&self, key: &CacheKey, data_sets: &DataSets, now: DateTime<Utc>) -> Result<(), CacheError> {
        let size = estimate_size(data_sets)?;
        self.insert_sized(key, data_sets.clone(), size, now)
    }

    /// Make room for an entry of `new_size` bytes. Returns how many entries
    /// were evicted.
    pub fn enforce_limit(&self, new_size: u64, exclude_key: &CacheKey) -> usize {
        let evicted = self
            .inner
            .lock()
            .enforce_limit(new_size, exclude_key, self.budget_bytes);
        log_evictions(&evicted);
        evicted.len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.current_total,
            budget_bytes: self.budget_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_sized(
        &self,
        key: &CacheKey,
        data_sets: DataSets,
        size: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        if size > self.budget_bytes {
            return Err(CacheError::Oversized {
                size,
                budget: self.budget_bytes,
            });
        }

        let evicted = {
            let mut inner = self.inner.lock();
            if let Some(previous) = inner.entries.remove(key) {
                inner.current_total -= previous.size_bytes;
            }
            let evicted = inner.enforce_limit(size, key, self.budget_bytes);
            inner.current_total += size;
            inner.entries.insert(
                key.clone(),
                CacheEntry {
                    timestamp,
                    data_sets,
                    size_bytes: size,
                },
            );
            evicted
        };

        log_evictions(&evicted);
        log::debug!("Response cache: stored {} ({} bytes)", key, size);
        Ok(())
    }
}

fn log_evictions(evicted: &[CacheKey]) {
    for key in evicted {
        log::info!("Response cache: evicted {} to stay within budget", key);
    }
}

/// Approximate in-memory footprint: serialized length at two bytes per char.
///
/// Only needs to grow with the payload; it is not an exact byte count.
pub fn estimate_size<T: Serialize + ?Sized>(value: &T) -> Result<u64, CacheError> {
    let text = serde_json::to_string(value)?;
    Ok(text.chars().count() as u64 * 2)
}
