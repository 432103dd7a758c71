//! Politeness delay between successful downloads.

use rand::Rng;
use std::time::Duration;

/// Source of the wait inserted after each successful download.
pub trait PacingSource: Send + Sync {
    /// Next delay, within `min..=max`.
    fn next_delay(&self, min: Duration, max: Duration) -> Duration;
}

/// Draws each delay uniformly at random from the range.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformPacing;

impl PacingSource for UniformPacing {
    fn next_delay(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let span = u64::try_from((max - min).as_nanos()).unwrap_or(u64::MAX);
        min + Duration::from_nanos(rand::rng().random_range(0..=span))
    }
}

/// Always returns the same delay and ignores the configured range.
/// `FixedPacing::default()` disables pacing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPacing(pub Duration);

impl PacingSource for FixedPacing {
    fn next_delay(&self, _min: Duration, _max: Duration) -> Duration {
        self.0
    }
}
