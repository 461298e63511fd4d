//! Exponentially smoothed upload speed.

use std::time::Duration;

/// Weight given to the newest sample.
const SMOOTHING: f64 = 0.1;

/// Tracks a smoothed bytes-per-second estimate across chunks.
///
/// Each sample updates the estimate as `prev * 0.9 + instant * 0.1`; the first
/// sample is taken as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThroughputEstimator {
    speed: Option<f64>,
}

impl ThroughputEstimator {
    /// Create an estimator with no samples.
    #[must_use]
    pub const fn new() -> Self {
        Self { speed: None }
    }

    /// Record a chunk of `bytes` sent in `elapsed` and return the new
    /// estimate.
    ///
    /// A zero elapsed time counts the chunk size itself as the instantaneous
    /// speed.
    pub fn record(&mut self, bytes: u64, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        let instant = if secs > 0.0 {
            bytes as f64 / secs
        } else {
            bytes as f64
        };

        let speed = self
            .speed
            .map_or(instant, |prev| prev.mul_add(1.0 - SMOOTHING, instant * SMOOTHING));
        self.speed = Some(speed);
        speed
    }

    /// Current estimate in bytes per second, if any sample was recorded.
    #[must_use]
    pub const fn speed(&self) -> Option<f64> {
        self.speed
    }

    /// Forget all samples.
    pub fn reset(&mut self) {
        self.speed = None;
    }
}
