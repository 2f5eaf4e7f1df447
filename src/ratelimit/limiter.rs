//! Feature-level rate limiter built on the preset sliding counters.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::definition::RateDefinition;
use super::presets::{PresetCounters, TimeWindow};
use super::scope::Scope;
use crate::error::Result;

/// Shortest sleep between checks while waiting for a window to clear.
const MIN_WAIT: Duration = Duration::from_millis(10);

/// Supplies the limits that apply to a scope.
pub type RateLimitsFn = dyn Fn(&Scope) -> RateDefinition + Send + Sync;

/// Usage of one limited window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateStatus {
    pub window: TimeWindow,
    /// Current sliding count
    pub count: f64,
    /// Configured limit
    pub limit: f64,
    /// Seconds until `count` decays to `limit`, zero if below it
    pub wait_secs: f64,
}

impl RateStatus {
    /// Whether this window currently blocks usage.
    pub fn is_exceeded(&self) -> bool {
        self.count >= self.limit
    }
}

/// Limits usage of one feature across every window of its [`RateDefinition`].
///
/// Counts are kept per feature and scope; the feature key is prepended to
/// the caller's scope so that features sharing the preset counters never
/// share counts.
pub struct RateLimiter {
    feature_key: String,
    presets: Arc<PresetCounters>,
    get_rate_limits: Box<RateLimitsFn>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("feature_key", &self.feature_key)
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter whose limits are computed per scope.
    pub fn new<F>(feature_key: impl Into<String>, presets: Arc<PresetCounters>, get_rate_limits: F) -> Self
    where
        F: Fn(&Scope) -> RateDefinition + Send + Sync + 'static,
    {
        Self {
            feature_key: feature_key.into(),
            presets,
            get_rate_limits: Box::new(get_rate_limits),
        }
    }

    /// Create a limiter applying the same limits to every scope.
    pub fn with_definition(
        feature_key: impl Into<String>,
        presets: Arc<PresetCounters>,
        definition: RateDefinition,
    ) -> Self {
        Self::new(feature_key, presets, move |_| definition)
    }

    pub fn feature_key(&self) -> &str {
        &self.feature_key
    }

    fn counter_scope(&self, scope: &Scope) -> Scope {
        scope.prefixed(&self.feature_key)
    }

    /// Record `delta` uses by `scope` in every limited window.
    pub fn report_usage(&self, scope: &Scope, delta: u64) -> Result<()> {
        let counter_scope = self.counter_scope(scope);
        for (window, _) in (self.get_rate_limits)(scope).iter_rates() {
            self.presets.get(window).increment(&counter_scope, delta)?;
        }
        trace!(feature = %self.feature_key, scope = %scope, delta, "Reported usage");
        Ok(())
    }

    /// The largest window whose limit `scope` has reached, if any.
    pub fn get_window_of_first_exceeded_limit(&self, scope: &Scope) -> Result<Option<TimeWindow>> {
        let counter_scope = self.counter_scope(scope);
        for (window, limit) in (self.get_rate_limits)(scope).iter_rates() {
            if self.presets.get(window).get(&counter_scope)? >= limit {
                return Ok(Some(window));
            }
        }
        Ok(None)
    }

    /// Whether `scope` may use the feature now.
    ///
    /// Fails open: if the counters cannot be read, usage is allowed.
    pub fn allow_usage(&self, scope: &Scope) -> bool {
        match self.get_window_of_first_exceeded_limit(scope) {
            Ok(None) => true,
            Ok(Some(window)) => {
                debug!(
                    feature = %self.feature_key,
                    scope = %scope,
                    window = %window,
                    "Rate limit exceeded"
                );
                false
            }
            Err(e) => {
                warn!(
                    feature = %self.feature_key,
                    error = %e,
                    "Rate counters unavailable, allowing usage"
                );
                true
            }
        }
    }

    /// Count, limit and wait time of every limited window, largest first.
    pub fn iter_rates(&self, scope: &Scope) -> Result<Vec<RateStatus>> {
        let counter_scope = self.counter_scope(scope);
        (self.get_rate_limits)(scope)
            .iter_rates()
            .map(|(window, limit)| {
                let usage = self
                    .presets
                    .get(window)
                    .get_count_and_wait_time(&counter_scope, limit)?;
                Ok(RateStatus {
                    window,
                    count: usage.count,
                    limit,
                    wait_secs: usage.wait_secs,
                })
            })
            .collect()
    }

    /// Wait until `scope` may use the feature, giving up after `timeout`.
    ///
    /// Returns `false` straight away if a window in `windows_not_to_wait_on`
    /// is exceeded, or as soon as the required wait would overrun `timeout`.
    pub async fn wait_for_allowance(
        &self,
        scope: &Scope,
        timeout: Duration,
        windows_not_to_wait_on: &[TimeWindow],
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;

        loop {
            let rates = self.iter_rates(scope)?;
            let mut exceeded = rates.iter().filter(|rate| rate.is_exceeded()).peekable();
            if exceeded.peek().is_none() {
                return Ok(true);
            }

            let mut wait_secs: f64 = 0.0;
            for rate in exceeded {
                if windows_not_to_wait_on.contains(&rate.window) {
                    debug!(
                        feature = %self.feature_key,
                        window = %rate.window,
                        "Exceeded a window not worth waiting on"
                    );
                    return Ok(false);
                }
                wait_secs = wait_secs.max(rate.wait_secs);
            }

            let delay = Duration::from_secs_f64(wait_secs).max(MIN_WAIT);
            if Instant::now() + delay > deadline {
                return Ok(false);
            }

            trace!(feature = %self.feature_key, delay = ?delay, "Waiting for rate limit");
            tokio::time::sleep(delay).await;
        }
    }
}
