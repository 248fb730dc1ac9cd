//! Bounded exponential backoff around a single remote call.
//!
//! Only throttling failures are retried. Every attempt, the first included,
//! goes through the shared [`Pacer`] before the call is issued.
//!
//! Backoff before retry `a` (0-indexed): `min(base * 2^a, max) + jitter`,
//! which with the defaults gives roughly 5s, 10s, 20s, then 30s.

use std::future::Future;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::time::{sleep, Duration};

use crate::core::error::RemoteError;
use crate::core::pacer::Pacer;
use crate::core::JitterRange;
use crate::SinkRef;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_JITTER_MIN: Duration = Duration::from_millis(100);
pub const DEFAULT_JITTER_MAX: Duration = Duration::from_millis(2000);
pub const DEFAULT_JITTER: JitterRange = JitterRange::ordered(DEFAULT_JITTER_MIN, DEFAULT_JITTER_MAX);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Total number of attempts, the first call included.
    pub max_retries: u32,
    pub jitter: JitterRange,
}

impl RetryPolicy {
    /// Deterministic part of the delay before retry `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus a fresh jitter sample.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff(attempt).saturating_add(self.jitter.sample())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            jitter: DEFAULT_JITTER,
        }
    }
}

/// One throttled attempt and the wait applied before the next one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attempt {
    pub number: u32,
    pub delay: Duration,
}

pub struct RetryCoordinator {
    pacer: Arc<Pacer>,
    policy: RetryPolicy,
    sink: SinkRef,
}

impl RetryCoordinator {
    pub fn new(pacer: Arc<Pacer>, policy: RetryPolicy, sink: SinkRef) -> Self {
        Self { pacer, policy, sink }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails with a non-throttling error,
    /// or the attempt budget is spent.
    ///
    /// `operation` is invoked once per attempt and must build a fresh request
    /// each time.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_retries = self.policy.max_retries;

        for attempt in 0..max_retries {
            self.pacer.admit().await;
            debug!("{}: attempting ({}/{})", label, attempt + 1, max_retries);

            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!("{}: succeeded after {} retries", label, attempt);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_throttled() => {
                    if attempt + 1 >= max_retries {
                        warn!("{}: still throttled after {} attempts", label, max_retries);
                        return Err(RemoteError::RetriesExhausted { attempts: max_retries });
                    }

                    let record = Attempt {
                        number: attempt,
                        delay: self.policy.delay_for(attempt),
                    };
                    warn!("{}: throttled, retrying in {:?}", label, record.delay);
                    self.sink.on_retry(&record);
                    sleep(record.delay).await;
                }
                Err(err) => {
                    debug!("{}: failed without retry: {}", label, err);
                    return Err(err);
                }
            }
        }

        Err(RemoteError::RetriesExhausted { attempts: max_retries })
    }
}
