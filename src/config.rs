//! Configuration management for ratewindow.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RateWindowError, Result};
use crate::ratelimit::{RateDefinition, TimeWindow};

/// Prefix of environment variables that override file settings,
/// e.g. `RATEWINDOW__PRESETS__HOUR__GRAINS_PER_WINDOW=12`.
pub const ENV_PREFIX: &str = "RATEWINDOW";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateWindowConfig {
    /// Grain and memoization settings of the preset counters
    #[serde(default)]
    pub presets: PresetsConfig,

    /// Rate limits by feature key
    #[serde(default)]
    pub limits: BTreeMap<String, RateDefinition>,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Settings of one preset sliding counter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowPreset {
    /// Number of grains the window is split into
    pub grains_per_window: u32,
    /// Maximum local staleness of the current grain, in seconds
    #[serde(default)]
    pub memoize_timeout_secs: f64,
}

impl WindowPreset {
    const fn new(grains_per_window: u32, memoize_timeout_secs: f64) -> Self {
        Self {
            grains_per_window,
            memoize_timeout_secs,
        }
    }

    /// The memoize timeout as a [`Duration`], if it is a non-negative
    /// number small enough to represent.
    pub fn memoize_timeout(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.memoize_timeout_secs).ok()
    }
}

/// Settings of every preset sliding counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetsConfig {
    #[serde(default = "default_week")]
    pub week: WindowPreset,
    #[serde(default = "default_day")]
    pub day: WindowPreset,
    #[serde(default = "default_hour")]
    pub hour: WindowPreset,
    #[serde(default = "default_minute")]
    pub minute: WindowPreset,
    #[serde(default = "default_second")]
    pub second: WindowPreset,
}

impl Default for PresetsConfig {
    fn default() -> Self {
        Self {
            week: default_week(),
            day: default_day(),
            hour: default_hour(),
            minute: default_minute(),
            second: default_second(),
        }
    }
}

fn default_week() -> WindowPreset {
    WindowPreset::new(7, 900.0)
}

fn default_day() -> WindowPreset {
    WindowPreset::new(24, 60.0)
}

fn default_hour() -> WindowPreset {
    WindowPreset::new(4, 15.0)
}

fn default_minute() -> WindowPreset {
    WindowPreset::new(6, 2.0)
}

fn default_second() -> WindowPreset {
    WindowPreset::new(2, 0.0)
}

impl PresetsConfig {
    /// The settings for `window`.
    pub fn get(&self, window: TimeWindow) -> &WindowPreset {
        match window {
            TimeWindow::Week => &self.week,
            TimeWindow::Day => &self.day,
            TimeWindow::Hour => &self.hour,
            TimeWindow::Minute => &self.minute,
            TimeWindow::Second => &self.second,
        }
    }

    /// Reject settings that cannot build a counter.
    pub fn validate(&self) -> Result<()> {
        for window in TimeWindow::ALL {
            let preset = self.get(window);
            if preset.grains_per_window < 1 {
                return Err(RateWindowError::Config(format!(
                    "presets.{window}: grains_per_window must be at least 1"
                )));
            }
            if preset.memoize_timeout().is_none() {
                return Err(RateWindowError::Config(format!(
                    "presets.{window}: memoize_timeout_secs must be a non-negative number of seconds"
                )));
            }
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RateWindowConfig {
    /// Load configuration from a file, with `RATEWINDOW__*` environment
    /// variables taking precedence.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config: RateWindowConfig = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateWindowConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RateWindowError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configuration that cannot be used.
    pub fn validate(&self) -> Result<()> {
        self.presets.validate()?;
        for (feature, definition) in &self.limits {
            if let Some(window) = definition.invalid_window() {
                return Err(RateWindowError::Config(format!(
                    "limits.{feature}: per_{window} must be a non-negative number"
                )));
            }
        }
        Ok(())
    }

    /// The limits configured for `feature`.
    pub fn limits_for(&self, feature: &str) -> Option<&RateDefinition> {
        self.limits.get(feature)
    }
}
