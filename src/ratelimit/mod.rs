//! Rate counters and the limiter built on them.

mod definition;
mod fixed;
mod limiter;
mod presets;
mod scope;
mod sliding;

pub use definition::RateDefinition;
pub use fixed::{FixedWindowOptions, FixedWindowRateCounter, DEFAULT_MEMOIZE_TIMEOUT};
pub use limiter::{RateLimiter, RateLimitsFn, RateStatus};
pub use presets::{PresetCounters, TimeWindow};
pub use scope::Scope;
pub use sliding::{SlidingWindowOptions, SlidingWindowRateCounter, WindowUsage};
