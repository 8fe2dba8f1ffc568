//! Error injection controller for log service testing.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Controller for injecting errors during log service testing.
///
/// Each counter fails the next N calls of its kind and then lets calls through again.
#[derive(Debug, Default)]
pub struct LogErrorInjector {
    /// Reject the next N puts as rate limited.
    throttle_next_puts: AtomicUsize,
    /// Fail the next N puts with an unrecoverable error.
    fail_next_puts: AtomicUsize,
    /// Reject the next N puts as if the destination did not exist.
    not_found_next_puts: AtomicUsize,
    /// Reject the next N puts as if their token was stale.
    invalid_token_next_puts: AtomicUsize,
    /// Reject the next N group or stream creations as rate limited.
    throttle_next_creates: AtomicUsize,
    /// Fail the next N group or stream creations.
    fail_next_creates: AtomicUsize,
    /// Reject the next N stream creations as if their group did not exist yet.
    not_found_next_stream_creates: AtomicUsize,
    /// Reject the next N describes as rate limited.
    throttle_next_describes: AtomicUsize,
    /// Fail the next N describes.
    fail_next_describes: AtomicUsize,
    /// Leave the expected token out of invalid token rejections.
    withhold_expected_token: AtomicBool,
    /// Artificial put latency in milliseconds.
    put_latency_ms: AtomicU64,
}

impl LogErrorInjector {
    /// Create a new error injector with all errors disabled.
    pub fn new() -> Self {
        Self::default()
    }

    // === Failure injection setters ===

    pub fn throttle_puts(&self, count: usize) {
        self.throttle_next_puts.store(count, Ordering::Relaxed);
    }

    pub fn fail_puts(&self, count: usize) {
        self.fail_next_puts.store(count, Ordering::Relaxed);
    }

    pub fn fail_puts_not_found(&self, count: usize) {
        self.not_found_next_puts.store(count, Ordering::Relaxed);
    }

    pub fn fail_puts_invalid_token(&self, count: usize) {
        self.invalid_token_next_puts.store(count, Ordering::Relaxed);
    }

    pub fn throttle_creates(&self, count: usize) {
        self.throttle_next_creates.store(count, Ordering::Relaxed);
    }

    pub fn fail_creates(&self, count: usize) {
        self.fail_next_creates.store(count, Ordering::Relaxed);
    }

    pub fn fail_stream_creates_not_found(&self, count: usize) {
        self.not_found_next_stream_creates
            .store(count, Ordering::Relaxed);
    }

    pub fn throttle_describes(&self, count: usize) {
        self.throttle_next_describes.store(count, Ordering::Relaxed);
    }

    pub fn fail_describes(&self, count: usize) {
        self.fail_next_describes.store(count, Ordering::Relaxed);
    }

    /// Makes invalid token rejections omit the expected token, forcing a describe.
    pub fn withhold_expected_token(&self, withhold: bool) {
        self.withhold_expected_token
            .store(withhold, Ordering::Relaxed);
    }

    // === Latency injection setters ===

    pub fn set_put_latency(&self, ms: u64) {
        self.put_latency_ms.store(ms, Ordering::Relaxed);
    }

    // === Internal check methods ===

    pub(crate) fn should_throttle_put(&self) -> bool {
        Self::decrement_counter(&self.throttle_next_puts)
    }

    pub(crate) fn should_fail_put(&self) -> bool {
        Self::decrement_counter(&self.fail_next_puts)
    }

    pub(crate) fn should_not_find_put(&self) -> bool {
        Self::decrement_counter(&self.not_found_next_puts)
    }

    pub(crate) fn should_reject_put_token(&self) -> bool {
        Self::decrement_counter(&self.invalid_token_next_puts)
    }

    pub(crate) fn should_throttle_create(&self) -> bool {
        Self::decrement_counter(&self.throttle_next_creates)
    }

    pub(crate) fn should_fail_create(&self) -> bool {
        Self::decrement_counter(&self.fail_next_creates)
    }

    pub(crate) fn should_not_find_stream_create(&self) -> bool {
        Self::decrement_counter(&self.not_found_next_stream_creates)
    }

    pub(crate) fn should_throttle_describe(&self) -> bool {
        Self::decrement_counter(&self.throttle_next_describes)
    }

    pub(crate) fn should_fail_describe(&self) -> bool {
        Self::decrement_counter(&self.fail_next_describes)
    }

    pub(crate) fn withholds_expected_token(&self) -> bool {
        self.withhold_expected_token.load(Ordering::Relaxed)
    }

    /// Helper to decrement a counter and return true if it was > 0.
    fn decrement_counter(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1))
            .is_ok()
    }

    // === Latency application methods ===

    pub(crate) async fn apply_put_latency(&self) {
        let ms = self.put_latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}
