//! Global pacing of requests to the log service.
//!
//! The service limits the request rate of an account independently of how many streams are
//! written, so a single [`RateGovernor`] is shared by every delivery task. It also hands out
//! the back-off schedules used when the service reports that it is throttling us.
use std::time::Duration;

use backoff::strategy::exponential::Exponential;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::RetryConfig;
use crate::error::Error;

#[derive(Debug)]
pub struct RateGovernor {
    min_interval: Duration,
    retry: RetryConfig,
    /// When the previous `throttle` call returned. Held while a caller waits, which queues the
    /// other callers behind it.
    last_release: Mutex<Option<Instant>>,
}

impl RateGovernor {
    pub fn new(min_interval: Duration, retry: RetryConfig) -> Self {
        Self {
            min_interval,
            retry,
            last_release: Mutex::new(None),
        }
    }

    /// Waits until at least `min_interval` has passed since the previous call returned.
    pub async fn throttle(&self, cancel: &CancellationToken) -> Result<()> {
        let mut last_release = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.last_release.lock() => guard,
        };

        if let Some(previous) = *last_release {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep_until(previous + self.min_interval) => {}
            }
        }

        *last_release = Some(Instant::now());
        Ok(())
    }

    /// A fresh, bounded back-off schedule.
    pub fn backoff(&self) -> Exponential {
        Exponential::new(
            self.retry.initial_interval,
            self.retry.max_interval,
            self.retry.factor,
            self.retry.jitter,
            Some(self.retry.max_attempts),
        )
        .with_max_elapsed(self.retry.max_elapsed)
    }
}
