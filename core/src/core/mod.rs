pub mod error;
pub mod generator;
pub mod pacer;
pub mod prompts;
pub mod retry;

use rand::Rng;
use std::time::Duration;

use crate::core::error::ConfigError;

/// Closed interval a random delay is drawn from, uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterRange {
    min: Duration,
    max: Duration,
}

impl JitterRange {
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvertedJitter {
                field: "jitter",
                min: min.as_secs_f64(),
                max: max.as_secs_f64(),
            });
        }
        Ok(Self { min, max })
    }

    /// For constant ranges; inverted bounds fail const evaluation.
    pub(crate) const fn ordered(min: Duration, max: Duration) -> Self {
        assert!(min.as_nanos() <= max.as_nanos(), "inverted jitter range");
        Self { min, max }
    }

    pub const fn none() -> Self {
        Self { min: Duration::ZERO, max: Duration::ZERO }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        // Offset from min in whole nanoseconds, so the result never rounds
        // outside the bounds. Spans past u64 nanoseconds are clamped.
        let span = u64::try_from((self.max - self.min).as_nanos()).unwrap_or(u64::MAX);
        self.min + Duration::from_nanos(rand::rng().random_range(0..=span))
    }

    pub fn contains(&self, value: Duration) -> bool {
        value >= self.min && value <= self.max
    }
}
