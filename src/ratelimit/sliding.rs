//! Approximate sliding window rate counter.
//!
//! A sliding window of length `W` is approximated by `N` fixed "grains" of
//! length `W / N`. A read sums the `N` most recent grains in full plus the
//! grain just before them, scaled down linearly by how far the clock has
//! moved into the current grain. Counts therefore fade out smoothly as time
//! passes instead of dropping to zero at a window boundary, without storing
//! individual event timestamps.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::fixed::{FixedWindowOptions, FixedWindowRateCounter, DEFAULT_MEMOIZE_TIMEOUT};
use super::scope::Scope;
use crate::cache::{LocalCache, SharedCache};
use crate::clock::{Clock, SystemClock};
use crate::error::{RateWindowError, Result};

/// Parameters of a [`SlidingWindowRateCounter`].
#[derive(Debug, Clone)]
pub struct SlidingWindowOptions {
    /// Human-readable counter name, e.g. "week"
    pub key: String,
    /// Length of the sliding window
    pub window_duration: Duration,
    /// Shift applied to grain boundaries
    pub window_offset: Duration,
    /// Number of grains the window is split into
    pub grains_per_window: u32,
    /// How long a local read of the current grain may lag
    pub memoize_timeout: Duration,
}

impl SlidingWindowOptions {
    /// Options for a single-grain window with the given name and length.
    pub fn new(key: impl Into<String>, window_duration: Duration) -> Self {
        Self {
            key: key.into(),
            window_duration,
            window_offset: Duration::ZERO,
            grains_per_window: 1,
            memoize_timeout: DEFAULT_MEMOIZE_TIMEOUT,
        }
    }

    /// Split the window into `grains` grains.
    pub fn grains_per_window(mut self, grains: u32) -> Self {
        self.grains_per_window = grains;
        self
    }

    /// Accept up to `timeout` of local staleness.
    pub fn memoize_timeout(mut self, timeout: Duration) -> Self {
        self.memoize_timeout = timeout;
        self
    }

    /// Shift grain boundaries by `offset`.
    pub fn window_offset(mut self, offset: Duration) -> Self {
        self.window_offset = offset;
        self
    }
}

/// Sliding count for a scope, and how long until it falls to a threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowUsage {
    /// Interpolated number of events in the window
    pub count: f64,
    /// Seconds until `count` decays to the threshold, zero if already below
    pub wait_secs: f64,
}

impl WindowUsage {
    /// The wait as a [`Duration`].
    pub fn wait(&self) -> Duration {
        Duration::from_secs_f64(self.wait_secs.max(0.0))
    }
}

/// Raw grain counts, newest first, plus progress through the newest grain.
#[derive(Debug)]
struct GrainCounts {
    /// `grains_per_window + 1` entries; the last one is aging out
    counts: Vec<u64>,
    /// Fraction of the newest grain already elapsed, in `[0, 1]`
    progress: f64,
}

impl GrainCounts {
    fn total(&self) -> f64 {
        match self.counts.split_last() {
            Some((&oldest, rest)) => {
                let full: u64 = rest.iter().sum();
                full as f64 + oldest as f64 * (1.0 - self.progress)
            }
            None => 0.0,
        }
    }

    /// Number of grains, from now, until the total decays to `threshold`.
    ///
    /// Grain `age` (0 = newest) counts in full until the clock has advanced
    /// `N - age` grains past the start of the newest grain, then fades out
    /// over one more grain. Walking from the newest grain, the threshold is
    /// crossed while the first grain that brings the running sum to it is
    /// fading; the crossing point within that grain is found directly.
    fn grains_until(&self, threshold: f64) -> f64 {
        let oldest_age = self.counts.len() - 1;
        let mut cumulative = 0.0;

        for (age, &grain_count) in self.counts.iter().enumerate() {
            if grain_count == 0 {
                continue;
            }
            let grain_count = grain_count as f64;
            let new_count = cumulative + grain_count;
            if new_count >= threshold {
                let crossing = (oldest_age - age) as f64 + (new_count - threshold) / grain_count;
                return (crossing - self.progress).max(0.0);
            }
            cumulative = new_count;
        }

        // Nothing left to age out.
        0.0
    }
}

/// Counts events per scope over a sliding window built from fixed grains.
pub struct SlidingWindowRateCounter {
    key: String,
    grains_per_window: u32,
    /// Grain length in seconds
    grain_duration: f64,
    grain_counter: FixedWindowRateCounter,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SlidingWindowRateCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowRateCounter")
            .field("key", &self.key)
            .field("grains_per_window", &self.grains_per_window)
            .field("grain_duration", &self.grain_duration)
            .field("grain_counter", &self.grain_counter)
            .finish()
    }
}

impl SlidingWindowRateCounter {
    /// Create a sliding counter over the given cache tiers.
    ///
    /// Grain counts are retained for one grain longer than the window so
    /// the grain that is aging out can still be read.
    pub fn new(
        options: SlidingWindowOptions,
        shared: Arc<dyn SharedCache>,
        local: Arc<dyn LocalCache>,
    ) -> Result<Self> {
        if options.grains_per_window < 1 {
            return Err(RateWindowError::Config(format!(
                "counter '{}': grains_per_window must be at least 1",
                options.key
            )));
        }
        if options.window_duration.is_zero() {
            return Err(RateWindowError::Config(format!(
                "counter '{}': window_duration must be positive",
                options.key
            )));
        }

        let grain_duration = options.window_duration / options.grains_per_window;
        let grain_counter = FixedWindowRateCounter::new(
            FixedWindowOptions {
                key: options.key.clone(),
                window_duration: grain_duration,
                window_offset: options.window_offset,
                keep_windows: options.grains_per_window + 1,
                memoize_timeout: options.memoize_timeout,
            },
            shared,
            local,
        )?;

        debug!(
            counter = %options.key,
            window = ?options.window_duration,
            grains = options.grains_per_window,
            "Created sliding window counter"
        );

        Ok(Self {
            key: options.key,
            grains_per_window: options.grains_per_window,
            grain_duration: grain_counter.window_duration(),
            grain_counter,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` instead of the system clock for untimed calls.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.grain_counter = self.grain_counter.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    /// The counter name.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn grains_per_window(&self) -> u32 {
        self.grains_per_window
    }

    /// Grain length in seconds.
    pub fn grain_duration(&self) -> f64 {
        self.grain_duration
    }

    /// Window length in seconds.
    pub fn window_duration(&self) -> f64 {
        self.grain_duration * self.grains_per_window as f64
    }

    /// Sliding count for `scope` now.
    pub fn get(&self, scope: &Scope) -> Result<f64> {
        self.get_at(scope, self.clock.now())
    }

    /// Sliding count for `scope` at `timestamp`.
    pub fn get_at(&self, scope: &Scope, timestamp: f64) -> Result<f64> {
        Ok(self.grain_counts(scope, timestamp)?.total())
    }

    /// Record `delta` events for `scope` now.
    pub fn increment(&self, scope: &Scope, delta: u64) -> Result<()> {
        self.increment_at(scope, delta, self.clock.now())
    }

    /// Record `delta` events for `scope` in the grain containing `timestamp`.
    pub fn increment_at(&self, scope: &Scope, delta: u64, timestamp: f64) -> Result<()> {
        self.grain_counter.increment_at(scope, delta, timestamp)
    }

    /// Record `delta` events for `scope` now and return the new sliding count.
    pub fn increment_and_get(&self, scope: &Scope, delta: u64) -> Result<f64> {
        self.increment_and_get_at(scope, delta, self.clock.now())
    }

    /// Record `delta` events at `timestamp` and return the sliding count there.
    pub fn increment_and_get_at(&self, scope: &Scope, delta: u64, timestamp: f64) -> Result<f64> {
        self.increment_at(scope, delta, timestamp)?;
        self.get_at(scope, timestamp)
    }

    /// Sliding count for `scope` now, and the wait until it decays to
    /// `threshold`.
    pub fn get_count_and_wait_time(&self, scope: &Scope, threshold: f64) -> Result<WindowUsage> {
        self.get_count_and_wait_time_at(scope, threshold, self.clock.now())
    }

    /// Sliding count for `scope` at `timestamp`, and the wait until it decays
    /// to `threshold` assuming no further increments.
    ///
    /// A negative threshold is meaningless and yields a zero usage without
    /// reading any counts.
    pub fn get_count_and_wait_time_at(
        &self,
        scope: &Scope,
        threshold: f64,
        timestamp: f64,
    ) -> Result<WindowUsage> {
        if threshold < 0.0 {
            return Ok(WindowUsage::default());
        }

        let grains = self.grain_counts(scope, timestamp)?;
        let count = grains.total();
        if count < threshold {
            return Ok(WindowUsage {
                count,
                wait_secs: 0.0,
            });
        }

        let wait_secs = grains.grains_until(threshold) * self.grain_duration;
        trace!(
            counter = %self.key,
            count,
            threshold,
            wait_secs,
            "Threshold reached"
        );
        Ok(WindowUsage { count, wait_secs })
    }

    fn grain_counts(&self, scope: &Scope, timestamp: f64) -> Result<GrainCounts> {
        // Grain index and progress come from one position so they agree at
        // boundaries the grain length cannot represent exactly.
        let position = self.grain_counter.window_position(timestamp);
        let index = position.floor() as i64;
        let progress = (position - index as f64).clamp(0.0, 1.0);

        let counts = (0..=self.grains_per_window)
            .map(|age| {
                self.grain_counter
                    .get_at_index(scope, index - i64::from(age), age == 0)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(GrainCounts { counts, progress })
    }
}
