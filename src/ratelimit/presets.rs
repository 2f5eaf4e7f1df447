//! Standard sliding counters, one per time window.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::sliding::{SlidingWindowOptions, SlidingWindowRateCounter};
use crate::cache::{LocalCache, SharedCache};
use crate::clock::Clock;
use crate::config::PresetsConfig;
use crate::error::{RateWindowError, Result};

/// Time window a limit is expressed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl TimeWindow {
    /// All windows, largest first.
    pub const ALL: [TimeWindow; 5] = [
        TimeWindow::Week,
        TimeWindow::Day,
        TimeWindow::Hour,
        TimeWindow::Minute,
        TimeWindow::Second,
    ];

    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Week => Duration::from_secs(7 * 86400),
            TimeWindow::Day => Duration::from_secs(86400),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Second => Duration::from_secs(1),
        }
    }

    /// The counter name used for this window.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Week => "week",
            TimeWindow::Day => "day",
            TimeWindow::Hour => "hour",
            TimeWindow::Minute => "minute",
            TimeWindow::Second => "second",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sliding counter per [`TimeWindow`], sharing the same cache tiers.
pub struct PresetCounters {
    counters: [SlidingWindowRateCounter; 5],
}

impl fmt::Debug for PresetCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.counters.iter()).finish()
    }
}

impl PresetCounters {
    /// Build the preset counters with default grain and memoize settings.
    pub fn new(shared: Arc<dyn SharedCache>, local: Arc<dyn LocalCache>) -> Result<Self> {
        Self::from_config(&PresetsConfig::default(), shared, local)
    }

    /// Build the preset counters from configuration.
    pub fn from_config(
        config: &PresetsConfig,
        shared: Arc<dyn SharedCache>,
        local: Arc<dyn LocalCache>,
    ) -> Result<Self> {
        config.validate()?;

        let build = |window: TimeWindow| -> Result<SlidingWindowRateCounter> {
            let preset = config.get(window);
            let memoize_timeout = preset.memoize_timeout().ok_or_else(|| {
                RateWindowError::Config(format!(
                    "presets.{window}: memoize_timeout_secs out of range"
                ))
            })?;
            SlidingWindowRateCounter::new(
                SlidingWindowOptions::new(window.as_str(), window.duration())
                    .grains_per_window(preset.grains_per_window)
                    .memoize_timeout(memoize_timeout),
                shared.clone(),
                local.clone(),
            )
        };

        Ok(Self {
            counters: [
                build(TimeWindow::Week)?,
                build(TimeWindow::Day)?,
                build(TimeWindow::Hour)?,
                build(TimeWindow::Minute)?,
                build(TimeWindow::Second)?,
            ],
        })
    }

    /// Drive every counter's untimed calls from `clock`.
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: self.counters.map(|c| c.with_clock(clock.clone())),
        }
    }

    /// The counter for `window`.
    pub fn get(&self, window: TimeWindow) -> &SlidingWindowRateCounter {
        let index = match window {
            TimeWindow::Week => 0,
            TimeWindow::Day => 1,
            TimeWindow::Hour => 2,
            TimeWindow::Minute => 3,
            TimeWindow::Second => 4,
        };
        &self.counters[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::WindowPreset;

    fn presets() -> PresetCounters {
        PresetCounters::new(Arc::new(MemoryCache::new()), Arc::new(MemoryCache::new())).unwrap()
    }

    #[test]
    fn test_time_window_duration() {
        assert_eq!(TimeWindow::Week.duration(), Duration::from_secs(604800));
        assert_eq!(TimeWindow::Day.duration(), Duration::from_secs(86400));
        assert_eq!(TimeWindow::Hour.duration(), Duration::from_secs(3600));
        assert_eq!(TimeWindow::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeWindow::Second.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_default_presets() {
        let presets = presets();

        for window in TimeWindow::ALL {
            let counter = presets.get(window);
            assert_eq!(counter.key(), window.as_str());
            assert_eq!(
                counter.window_duration(),
                window.duration().as_secs_f64()
            );
        }
        assert_eq!(presets.get(TimeWindow::Week).grains_per_window(), 7);
        assert_eq!(presets.get(TimeWindow::Day).grains_per_window(), 24);
        assert_eq!(presets.get(TimeWindow::Hour).grains_per_window(), 4);
        assert_eq!(presets.get(TimeWindow::Minute).grains_per_window(), 6);
        assert_eq!(presets.get(TimeWindow::Second).grains_per_window(), 2);
    }

    #[test]
    fn test_configured_grains() {
        let mut config = PresetsConfig::default();
        config.hour = WindowPreset {
            grains_per_window: 12,
            memoize_timeout_secs: 1.0,
        };

        let presets = PresetCounters::from_config(
            &config,
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryCache::new()),
        )
        .unwrap();
        assert_eq!(presets.get(TimeWindow::Hour).grains_per_window(), 12);
        assert_eq!(presets.get(TimeWindow::Hour).grain_duration(), 300.0);
    }

    #[test]
    fn test_unrepresentable_memoize_is_config_error() {
        let mut config = PresetsConfig::default();
        config.week.memoize_timeout_secs = 1e300;

        let result = PresetCounters::from_config(
            &config,
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryCache::new()),
        );
        assert!(matches!(result, Err(RateWindowError::Config(_))));
    }

    #[test]
    fn test_windows_do_not_share_counts() {
        let presets = presets();
        let scope = "alice".into();

        presets.get(TimeWindow::Hour).increment_at(&scope, 3, 7200.0).unwrap();
        assert_eq!(presets.get(TimeWindow::Hour).get_at(&scope, 7200.0).unwrap(), 3.0);
        assert_eq!(presets.get(TimeWindow::Minute).get_at(&scope, 7200.0).unwrap(), 0.0);
    }

    #[test]
    fn test_serde_names() {
        let window: TimeWindow = serde_yaml::from_str("minute").unwrap();
        assert_eq!(window, TimeWindow::Minute);
        assert_eq!(TimeWindow::Day.to_string(), "day");
    }
}
