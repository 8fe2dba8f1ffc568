use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Exponential backoff: the n-th delay is `base_interval * factor^(n - 1)`, optionally spread
/// by `jitter`, and never above `max_interval`.
///
/// The schedule ends (the iterator returns `None`) once `max_attempts` delays have been handed
/// out, or once `max_elapsed` has passed since the first delay was requested. The last delay is
/// shortened so that sleeping through it does not overrun `max_elapsed`.
///
/// ```
/// use std::time::Duration;
/// use backoff::strategy::exponential::Exponential;
///
/// let mut backoff = Exponential::from_millis(100, 1_000, 2.0, 0.0, Some(3));
/// assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
/// assert_eq!(backoff.next(), Some(Duration::from_millis(200)));
/// assert_eq!(backoff.next(), Some(Duration::from_millis(400)));
/// assert_eq!(backoff.next(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Exponential {
    base_interval: Duration,
    max_interval: Duration,
    factor: f64,
    /// Between 0.0 and 1.0; a delay `d` becomes a random value in `[d * (1 - j), d * (1 + j)]`.
    jitter: f64,
    /// `None` retries until `max_elapsed` (if any) runs out.
    max_attempts: Option<u16>,
    max_elapsed: Option<Duration>,
    started: Option<Instant>,
    current_attempt: u16,
}

impl Exponential {
    pub fn new(
        base_interval: Duration,
        max_interval: Duration,
        factor: f64,
        jitter: f64,
        max_attempts: Option<u16>,
    ) -> Self {
        Self {
            base_interval,
            max_interval,
            factor,
            jitter: jitter.clamp(0.0, 1.0),
            max_attempts,
            max_elapsed: None,
            started: None,
            current_attempt: 0,
        }
    }

    pub fn from_millis(
        base_interval_ms: u32,
        max_interval_ms: u32,
        factor: f64,
        jitter: f64,
        max_attempts: Option<u16>,
    ) -> Self {
        Self::new(
            Duration::from_millis(u64::from(base_interval_ms)),
            Duration::from_millis(u64::from(max_interval_ms)),
            factor,
            jitter,
            max_attempts,
        )
    }

    /// Stops the schedule once `max_elapsed` has passed since the first call to `next`.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Number of delays handed out so far.
    pub fn current_attempt(&self) -> u16 {
        self.current_attempt
    }

    fn delay_for(&self, attempt: u16) -> Duration {
        let exponent = i32::from(attempt.max(1) - 1);
        let max_ms = self.max_interval.as_millis() as f64;
        let mut delay_ms = (self.base_interval.as_millis() as f64 * self.factor.powi(exponent))
            .min(max_ms);

        if self.jitter > 0.0 {
            delay_ms *= rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        }

        // float to int casts saturate, so an overflowing power still lands on the cap
        Duration::from_millis(delay_ms.min(max_ms) as u64)
    }
}

impl Iterator for Exponential {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(max_attempts) = self.max_attempts
            && self.current_attempt >= max_attempts
        {
            return None;
        }

        let started = *self.started.get_or_insert_with(Instant::now);
        let remaining = match self.max_elapsed {
            Some(max_elapsed) => {
                let remaining = max_elapsed.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return None;
                }
                Some(remaining)
            }
            None => None,
        };

        self.current_attempt = self.current_attempt.saturating_add(1);
        let delay = self.delay_for(self.current_attempt);
        Some(remaining.map_or(delay, |remaining| delay.min(remaining)))
    }
}
