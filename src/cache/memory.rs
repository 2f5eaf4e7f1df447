//! In-process cache backed by a concurrent map.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use super::{LocalCache, SharedCache};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// Writes between sweeps of expired entries.
pub const SWEEP_INTERVAL: usize = 256;

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: u64,
    /// Absolute expiry in clock seconds; `None` never expires
    expires_at: Option<f64>,
}

impl Entry {
    fn is_expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// A thread-safe in-memory cache with per-key expiry.
///
/// Serves as the local tier in production and as a stand-in for the shared
/// tier in single-process deployments and tests. Increments hold the map
/// shard lock for the key, so they are atomic across threads.
///
/// Keys that are never read again after expiring are dropped by a sweep
/// that runs every [`SWEEP_INTERVAL`] writes.
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    writes: AtomicUsize,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl MemoryCache {
    /// Create an empty cache expiring entries against the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty cache expiring entries against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicUsize::new(0),
            clock,
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    /// Count a write and sweep if one is due. Must not be called while
    /// holding an entry guard.
    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_INTERVAL == 0 {
            self.purge_expired();
        }
    }

    fn read(&self, key: &str) -> Option<u64> {
        let now = self.clock.now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        self.entries.get(key).map(|entry| entry.value)
    }

    fn store(&self, key: &str, value: u64, ttl: Duration) {
        if ttl.is_zero() {
            self.entries.remove(key);
            return;
        }
        let expires_at = Some(self.clock.now() + ttl.as_secs_f64());
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        self.record_write();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Option<u64> {
        self.read(key)
    }

    fn set(&self, key: &str, value: u64, ttl: Duration) {
        self.store(key, value, ttl)
    }
}

impl SharedCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.read(key))
    }

    fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        self.store(key, value, ttl);
        Ok(())
    }

    fn incr(&self, key: &str, delta: u64) -> Result<u64> {
        let now = self.clock.now();
        let value = {
            let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
                value: 0,
                expires_at: None,
            });
            if entry.is_expired(now) {
                *entry = Entry {
                    value: 0,
                    expires_at: None,
                };
            }
            entry.value += delta;
            entry.value
        };
        self.record_write();
        Ok(value)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let deadline = self.clock.now() + ttl.as_secs_f64();
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(deadline);
        }
        Ok(())
    }
}
