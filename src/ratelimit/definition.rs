//! Rate limit definitions.
//!
//! A [`RateDefinition`] states how many events are allowed per week, day,
//! hour, minute and second. Any window may be left unset, meaning that
//! window is not limited.

use serde::{Deserialize, Serialize};

use super::presets::TimeWindow;

/// Limits per time window. Fractional limits are allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_week: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_day: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_hour: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_minute: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_second: Option<f64>,
}

impl RateDefinition {
    /// The limit for `window`, if any.
    pub fn limit(&self, window: TimeWindow) -> Option<f64> {
        match window {
            TimeWindow::Week => self.per_week,
            TimeWindow::Day => self.per_day,
            TimeWindow::Hour => self.per_hour,
            TimeWindow::Minute => self.per_minute,
            TimeWindow::Second => self.per_second,
        }
    }

    fn limit_mut(&mut self, window: TimeWindow) -> &mut Option<f64> {
        match window {
            TimeWindow::Week => &mut self.per_week,
            TimeWindow::Day => &mut self.per_day,
            TimeWindow::Hour => &mut self.per_hour,
            TimeWindow::Minute => &mut self.per_minute,
            TimeWindow::Second => &mut self.per_second,
        }
    }

    /// Apply `f` to every set limit.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        let mut mapped = *self;
        for window in TimeWindow::ALL {
            let limit = mapped.limit_mut(window);
            *limit = limit.map(&f);
        }
        mapped
    }

    /// Every set limit multiplied by `multiplier`.
    pub fn times(&self, multiplier: f64) -> Self {
        self.map(|limit| limit * multiplier)
    }

    /// Window-by-window sum. A window stays limited only if both sides
    /// limit it.
    pub fn plus(&self, other: &RateDefinition) -> Self {
        let mut sum = RateDefinition::default();
        for window in TimeWindow::ALL {
            *sum.limit_mut(window) = match (self.limit(window), other.limit(window)) {
                (Some(a), Some(b)) => Some(a + b),
                _ => None,
            };
        }
        sum
    }

    /// The set limits, largest window first.
    pub fn iter_rates(&self) -> impl Iterator<Item = (TimeWindow, f64)> + '_ {
        TimeWindow::ALL
            .into_iter()
            .filter_map(|window| self.limit(window).map(|limit| (window, limit)))
    }

    /// True if no window is limited.
    pub fn is_unlimited(&self) -> bool {
        self.iter_rates().next().is_none()
    }

    /// The first window whose limit is negative or not a number.
    pub fn invalid_window(&self) -> Option<TimeWindow> {
        self.iter_rates()
            .find(|(_, limit)| !limit.is_finite() || *limit < 0.0)
            .map(|(window, _)| window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> RateDefinition {
        RateDefinition {
            per_week: Some(1000.0),
            per_day: Some(200.0),
            per_minute: Some(10.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_iter_rates_largest_first() {
        let rates: Vec<_> = definition().iter_rates().collect();
        assert_eq!(
            rates,
            vec![
                (TimeWindow::Week, 1000.0),
                (TimeWindow::Day, 200.0),
                (TimeWindow::Minute, 10.0),
            ]
        );
    }

    #[test]
    fn test_times() {
        let doubled = definition().times(2.0);
        assert_eq!(doubled.per_week, Some(2000.0));
        assert_eq!(doubled.per_day, Some(400.0));
        assert_eq!(doubled.per_hour, None);
        assert_eq!(doubled.per_minute, Some(20.0));
    }

    #[test]
    fn test_plus_keeps_only_shared_windows() {
        let base = RateDefinition {
            per_week: Some(100.0),
            per_second: Some(1.0),
            ..Default::default()
        };
        let per_user = RateDefinition {
            per_week: Some(10.0),
            per_day: Some(5.0),
            ..Default::default()
        };

        let sum = base.plus(&per_user);
        assert_eq!(sum.per_week, Some(110.0));
        assert_eq!(sum.per_day, None);
        assert_eq!(sum.per_second, None);
    }

    #[test]
    fn test_per_user_scaling() {
        // A floor for the whole project plus an allowance per active user.
        let floor = RateDefinition {
            per_day: Some(50.0),
            ..Default::default()
        };
        let per_user = RateDefinition {
            per_day: Some(2.5),
            ..Default::default()
        };

        assert_eq!(floor.plus(&per_user.times(8.0)).per_day, Some(70.0));
    }

    #[test]
    fn test_map_floor() {
        let definition = RateDefinition {
            per_hour: Some(2.6),
            ..Default::default()
        };
        assert_eq!(definition.map(f64::floor).per_hour, Some(2.0));
    }

    #[test]
    fn test_unlimited() {
        assert!(RateDefinition::default().is_unlimited());
        assert!(!definition().is_unlimited());
    }

    #[test]
    fn test_invalid_window() {
        assert_eq!(definition().invalid_window(), None);

        let negative = RateDefinition {
            per_hour: Some(-1.0),
            ..Default::default()
        };
        assert_eq!(negative.invalid_window(), Some(TimeWindow::Hour));

        let nan = RateDefinition {
            per_second: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(nan.invalid_window(), Some(TimeWindow::Second));
    }
}
