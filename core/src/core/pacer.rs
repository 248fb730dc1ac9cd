//! Minimum-spacing gate for outbound calls to the generative service.
//!
//! Every remote call, retries included, passes through `admit()` first. If the
//! previous admission was less than `min_delay` ago the caller is parked for
//! the remainder plus a small random jitter. The timestamp sits behind an
//! async mutex held for the whole admission, so two callers can never be
//! admitted inside the same window.

use log::debug;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

use crate::core::JitterRange;

pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_JITTER_MIN: Duration = Duration::from_millis(100);
pub const DEFAULT_JITTER_MAX: Duration = Duration::from_millis(1000);
pub const DEFAULT_JITTER: JitterRange = JitterRange::ordered(DEFAULT_JITTER_MIN, DEFAULT_JITTER_MAX);

pub struct Pacer {
    min_delay: Duration,
    jitter: JitterRange,
    last_request: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(min_delay: Duration, jitter: JitterRange) -> Self {
        Self {
            min_delay,
            jitter,
            last_request: Mutex::new(None),
        }
    }

    /// Waits until the spacing floor is satisfied, then records the admission.
    /// Returns how long the caller was parked.
    pub async fn admit(&self) -> Duration {
        let mut last = self.last_request.lock().await;
        let mut waited = Duration::ZERO;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_delay {
                waited = (self.min_delay - elapsed).saturating_add(self.jitter.sample());
                debug!("pacer: {:?} since last request, waiting {:?}", elapsed, waited);
                sleep(waited).await;
            }
        }

        *last = Some(Instant::now());
        waited
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DELAY, DEFAULT_JITTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacer() -> Pacer {
        Pacer::new(
            Duration::from_secs(2),
            JitterRange::new(Duration::from_millis(100), Duration::from_millis(1000)).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_admission_is_immediate() {
        let pacer = pacer();
        assert_eq!(pacer.admit().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_admissions_are_spaced() {
        let pacer = pacer();
        let mut admitted = Vec::new();
        for _ in 0..5 {
            pacer.admit().await;
            admitted.push(Instant::now());
        }

        for pair in admitted.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= pacer.min_delay(), "gap {:?} below floor", gap);
            assert!(gap <= pacer.min_delay() + Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_includes_jitter() {
        let pacer = pacer();
        pacer.admit().await;
        let waited = pacer.admit().await;
        assert!(waited >= Duration::from_millis(2100));
        assert!(waited <= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_floor_has_passed() {
        let pacer = pacer();
        pacer.admit().await;
        sleep(Duration::from_secs(3)).await;
        assert_eq!(pacer.admit().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_elapsed_waits_only_remainder() {
        let pacer = Pacer::new(Duration::from_secs(2), JitterRange::none());
        pacer.admit().await;
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(pacer.admit().await, Duration::from_millis(500));
    }
}
