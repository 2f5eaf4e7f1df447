//! Two-tier counter cache.
//!
//! Counters are stored in a [`SharedCache`] that every process sees and that
//! provides atomic increments. Reads are served from a per-process
//! [`LocalCache`] whenever possible, accepting a bounded amount of staleness
//! in exchange for not hitting the shared tier on every check.

mod memory;

pub use memory::{MemoryCache, SWEEP_INTERVAL};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::error::Result;

/// A best-effort, process-local cache with per-key expiry.
pub trait LocalCache: Send + Sync {
    /// Read a value, `None` if absent or expired.
    fn get(&self, key: &str) -> Option<u64>;

    /// Store a value for `ttl`. A zero `ttl` stores nothing.
    fn set(&self, key: &str, value: u64, ttl: Duration);
}

/// The authoritative, multi-process counter store.
///
/// Implementations must make [`SharedCache::incr`] a true atomic increment;
/// a read-modify-write would lose updates under concurrent writers.
pub trait SharedCache: Send + Sync {
    /// Read a value, `Ok(None)` if absent or expired.
    fn get(&self, key: &str) -> Result<Option<u64>>;

    /// Store a value for `ttl`.
    fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<()>;

    /// Atomically add `delta`, creating the key at zero if missing, and
    /// return the new value. Does not touch the key's expiry.
    fn incr(&self, key: &str, delta: u64) -> Result<u64>;

    /// Set the expiry of an existing key.
    fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
}

/// A counter store that writes through to the shared tier and memoizes
/// reads in the local tier.
#[derive(Clone)]
pub struct CounterCache {
    shared: Arc<dyn SharedCache>,
    local: Arc<dyn LocalCache>,
    /// Lifetime of a counter in the shared tier
    timeout: Duration,
    /// How long a local copy of an active counter may lag behind
    memoized_timeout: Duration,
}

impl fmt::Debug for CounterCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterCache")
            .field("timeout", &self.timeout)
            .field("memoized_timeout", &self.memoized_timeout)
            .finish()
    }
}

impl CounterCache {
    /// Create a counter cache over the given tiers.
    pub fn new(
        shared: Arc<dyn SharedCache>,
        local: Arc<dyn LocalCache>,
        timeout: Duration,
        memoized_timeout: Duration,
    ) -> Self {
        Self {
            shared,
            local,
            timeout,
            memoized_timeout,
        }
    }

    /// Increment the counter for `key` by `delta` and return the new value.
    ///
    /// The shared expiry is only set by the increment that created the key,
    /// so a busy counter still expires on schedule instead of having its
    /// lifetime pushed back on every hit.
    pub fn incr(&self, key: &str, delta: u64) -> Result<u64> {
        let value = self.shared.incr(key, delta)?;
        if value == delta {
            trace!(key = %key, timeout = ?self.timeout, "Created counter");
            self.shared.expire(key, self.timeout)?;
        }
        self.local.set(key, value, self.memoized_timeout);
        Ok(value)
    }

    /// Read the counter for `key`, zero if it does not exist.
    ///
    /// `key_is_active` should be true while the counter may still receive
    /// increments; a value read for an inactive counter is final and is kept
    /// locally for the full shared timeout.
    pub fn get(&self, key: &str, key_is_active: bool) -> Result<u64> {
        if let Some(value) = self.local.get(key) {
            return Ok(value);
        }

        let value = self.shared.get(key)?.unwrap_or(0);
        let ttl = if key_is_active {
            self.memoized_timeout
        } else {
            self.timeout
        };
        self.local.set(key, value, ttl);
        Ok(value)
    }

    /// Lifetime of a counter in the shared tier.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Maximum local staleness of an active counter.
    pub fn memoized_timeout(&self) -> Duration {
        self.memoized_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RateWindowError;
    use parking_lot::Mutex;

    fn tiers(clock: &ManualClock) -> (Arc<MemoryCache>, Arc<MemoryCache>) {
        let clock: Arc<ManualClock> = Arc::new(clock.clone());
        (
            Arc::new(MemoryCache::with_clock(clock.clone())),
            Arc::new(MemoryCache::with_clock(clock)),
        )
    }

    fn counter_cache(shared: &Arc<MemoryCache>, local: &Arc<MemoryCache>) -> CounterCache {
        CounterCache::new(
            shared.clone(),
            local.clone(),
            Duration::from_secs(100),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_get_missing_is_zero() {
        let clock = ManualClock::new(0.0);
        let (shared, local) = tiers(&clock);
        let cache = counter_cache(&shared, &local);

        assert_eq!(cache.get("nothing", true).unwrap(), 0);
        assert_eq!(cache.get("nothing", false).unwrap(), 0);
    }

    #[test]
    fn test_incr_writes_both_tiers() {
        let clock = ManualClock::new(0.0);
        let (shared, local) = tiers(&clock);
        let cache = counter_cache(&shared, &local);

        assert_eq!(cache.incr("k", 1).unwrap(), 1);
        assert_eq!(cache.incr("k", 2).unwrap(), 3);

        assert_eq!(SharedCache::get(shared.as_ref(), "k").unwrap(), Some(3));
        assert_eq!(LocalCache::get(local.as_ref(), "k"), Some(3));
    }

    #[test]
    fn test_expiry_set_only_on_creation() {
        let clock = ManualClock::new(0.0);
        let (shared, local) = tiers(&clock);
        let cache = counter_cache(&shared, &local);

        cache.incr("k", 1).unwrap();
        clock.advance(90.0);
        cache.incr("k", 1).unwrap();
        clock.advance(11.0);

        // Created at t=0 with a 100s timeout; the second hit must not extend it.
        assert_eq!(SharedCache::get(shared.as_ref(), "k").unwrap(), None);
        assert_eq!(cache.get("k", true).unwrap(), 0);
    }

    #[test]
    fn test_local_copy_is_stale_until_memoized_timeout() {
        let clock = ManualClock::new(0.0);
        let (shared, local) = tiers(&clock);
        let cache = counter_cache(&shared, &local);

        cache.incr("k", 1).unwrap();
        // Another process bumps the shared counter.
        shared.incr("k", 4).unwrap();

        assert_eq!(cache.get("k", true).unwrap(), 1);
        clock.advance(5.0);
        assert_eq!(cache.get("k", true).unwrap(), 5);
    }

    #[test]
    fn test_inactive_read_memoized_for_full_timeout() {
        let clock = ManualClock::new(0.0);
        let (shared, local) = tiers(&clock);
        let cache = counter_cache(&shared, &local);

        shared.incr("old", 7).unwrap();
        assert_eq!(cache.get("old", false).unwrap(), 7);
        shared.incr("old", 1).unwrap();

        clock.advance(50.0);
        assert_eq!(cache.get("old", false).unwrap(), 7);
    }

    #[test]
    fn test_active_read_memoized_briefly() {
        let clock = ManualClock::new(0.0);
        let (shared, local) = tiers(&clock);
        let cache = counter_cache(&shared, &local);

        shared.incr("new", 2).unwrap();
        assert_eq!(cache.get("new", true).unwrap(), 2);
        shared.incr("new", 1).unwrap();

        clock.advance(6.0);
        assert_eq!(cache.get("new", true).unwrap(), 3);
    }

    #[test]
    fn test_zero_memoized_timeout_always_reads_shared() {
        let clock = ManualClock::new(0.0);
        let (shared, local) = tiers(&clock);
        let cache = CounterCache::new(
            shared.clone(),
            local.clone(),
            Duration::from_secs(100),
            Duration::ZERO,
        );

        cache.incr("k", 1).unwrap();
        shared.incr("k", 1).unwrap();
        assert_eq!(cache.get("k", true).unwrap(), 2);
        assert!(local.is_empty());
    }

    /// A shared tier that is down.
    struct Unreachable {
        calls: Mutex<u32>,
    }

    impl SharedCache for Unreachable {
        fn get(&self, _key: &str) -> Result<Option<u64>> {
            *self.calls.lock() += 1;
            Err(RateWindowError::Cache("connection refused".to_string()))
        }

        fn set(&self, _key: &str, _value: u64, _ttl: Duration) -> Result<()> {
            Err(RateWindowError::Cache("connection refused".to_string()))
        }

        fn incr(&self, _key: &str, _delta: u64) -> Result<u64> {
            *self.calls.lock() += 1;
            Err(RateWindowError::Cache("connection refused".to_string()))
        }

        fn expire(&self, _key: &str, _ttl: Duration) -> Result<()> {
            Err(RateWindowError::Cache("connection refused".to_string()))
        }
    }

    #[test]
    fn test_shared_failure_propagates() {
        let shared = Arc::new(Unreachable {
            calls: Mutex::new(0),
        });
        let cache = CounterCache::new(
            shared.clone(),
            Arc::new(MemoryCache::new()),
            Duration::from_secs(100),
            Duration::from_secs(5),
        );

        assert!(matches!(cache.incr("k", 1), Err(RateWindowError::Cache(_))));
        assert!(matches!(cache.get("k", true), Err(RateWindowError::Cache(_))));
        assert_eq!(*shared.calls.lock(), 2);
    }
}
