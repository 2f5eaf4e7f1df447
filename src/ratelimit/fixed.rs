//! Fixed window rate counter.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use super::scope::{window_key, Scope};
use crate::cache::{CounterCache, LocalCache, SharedCache};
use crate::clock::{Clock, SystemClock};
use crate::error::{RateWindowError, Result};

/// Default staleness accepted for locally memoized counts.
pub const DEFAULT_MEMOIZE_TIMEOUT: Duration = Duration::from_secs(15);

/// Parameters of a [`FixedWindowRateCounter`].
#[derive(Debug, Clone)]
pub struct FixedWindowOptions {
    /// Human-readable counter name, e.g. "week"
    pub key: String,
    /// Length of each window
    pub window_duration: Duration,
    /// Shift applied to window boundaries; zero aligns windows to the epoch
    pub window_offset: Duration,
    /// How many windows' worth of time a count is retained for
    pub keep_windows: u32,
    /// How long a local read of the current window may lag
    pub memoize_timeout: Duration,
}

impl FixedWindowOptions {
    /// Options for a counter with the given name and window length.
    pub fn new(key: impl Into<String>, window_duration: Duration) -> Self {
        Self {
            key: key.into(),
            window_duration,
            window_offset: Duration::ZERO,
            keep_windows: 1,
            memoize_timeout: DEFAULT_MEMOIZE_TIMEOUT,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.window_duration.is_zero() {
            return Err(RateWindowError::Config(format!(
                "counter '{}': window_duration must be positive",
                self.key
            )));
        }
        if self.keep_windows < 1 {
            return Err(RateWindowError::Config(format!(
                "counter '{}': keep_windows must be at least 1",
                self.key
            )));
        }
        Ok(())
    }
}

/// Counts events per scope inside non-overlapping windows of fixed length.
///
/// Each (counter, scope, window) triple maps to one opaque cache key. A
/// window that was never incremented, or whose count has expired, reads as
/// zero.
pub struct FixedWindowRateCounter {
    key: String,
    /// Window length in seconds
    window_duration: f64,
    /// Boundary shift in seconds
    window_offset: f64,
    cache: CounterCache,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FixedWindowRateCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowRateCounter")
            .field("key", &self.key)
            .field("window_duration", &self.window_duration)
            .field("window_offset", &self.window_offset)
            .field("cache", &self.cache)
            .finish()
    }
}

impl FixedWindowRateCounter {
    /// Create a counter over the given cache tiers.
    ///
    /// Fails with a configuration error if the window is empty or
    /// `keep_windows` is zero.
    pub fn new(
        options: FixedWindowOptions,
        shared: Arc<dyn SharedCache>,
        local: Arc<dyn LocalCache>,
    ) -> Result<Self> {
        options.validate()?;

        let timeout = options.window_duration * options.keep_windows;
        Ok(Self {
            key: options.key,
            window_duration: options.window_duration.as_secs_f64(),
            window_offset: options.window_offset.as_secs_f64(),
            cache: CounterCache::new(shared, local, timeout, options.memoize_timeout),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` instead of the system clock for untimed calls.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The counter name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Window length in seconds.
    pub fn window_duration(&self) -> f64 {
        self.window_duration
    }

    /// Position of `timestamp` in windows since the offset. The integer
    /// part is the window index, the fraction the progress through it.
    pub fn window_position(&self, timestamp: f64) -> f64 {
        (timestamp - self.window_offset) / self.window_duration
    }

    /// Index of the window containing `timestamp`.
    pub fn window_index(&self, timestamp: f64) -> i64 {
        self.window_position(timestamp).floor() as i64
    }

    /// The cache key holding `scope`'s count for the window containing
    /// `timestamp`.
    pub fn counter_key(&self, scope: &Scope, timestamp: f64) -> String {
        window_key(&self.key, scope, self.window_index(timestamp))
    }

    /// Record `delta` events for `scope` now.
    pub fn increment(&self, scope: &Scope, delta: u64) -> Result<()> {
        self.increment_at(scope, delta, self.clock.now())
    }

    /// Record `delta` events for `scope` in the window containing `timestamp`.
    pub fn increment_at(&self, scope: &Scope, delta: u64, timestamp: f64) -> Result<()> {
        let key = self.counter_key(scope, timestamp);
        let total = self.cache.incr(&key, delta)?;
        trace!(counter = %self.key, delta, total, "Incremented window");
        Ok(())
    }

    /// Count recorded for `scope` in the current window.
    pub fn get(&self, scope: &Scope) -> Result<u64> {
        self.get_at(scope, self.clock.now(), true)
    }

    /// Count recorded for `scope` in the window containing `timestamp`.
    ///
    /// `key_is_active` marks a window that may still be receiving
    /// increments, which limits how long the read is memoized locally.
    pub fn get_at(&self, scope: &Scope, timestamp: f64, key_is_active: bool) -> Result<u64> {
        self.get_at_index(scope, self.window_index(timestamp), key_is_active)
    }

    /// Count recorded for `scope` in the window numbered `window_index`.
    pub fn get_at_index(&self, scope: &Scope, window_index: i64, key_is_active: bool) -> Result<u64> {
        let key = window_key(&self.key, scope, window_index);
        self.cache.get(&key, key_is_active)
    }
}
