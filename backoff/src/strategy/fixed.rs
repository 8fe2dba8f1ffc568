//! A constant delay between runs, for exercising [`Retry`](crate::retry::Retry) in tests.
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Interval(Duration);

impl Interval {
    pub(crate) fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }
}

impl Iterator for Interval {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.0)
    }
}
