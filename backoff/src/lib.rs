//! Retry with backoff for async Rust.
//!
//! An [`Operation`] produces a fresh [`Future`] every time it is run. [`retry::Retry`] runs it
//! until it succeeds, until the [`Condition`] says the error is not worth retrying, or until the
//! backoff [`strategy`] runs dry, in which case the last error is returned.
//!
//! ```rust
//! use backoff::retry::Retry;
//! use backoff::strategy::exponential::Exponential;
//!
//! async fn create_group() -> Result<&'static str, &'static str> {
//!     Ok("created")
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let schedule = Exponential::from_millis(10, 100, 2.0, 0.0, Some(3));
//!     let result = Retry::new(schedule, create_group, |e: &&str| *e == "throttled").await;
//!     assert_eq!(result, Ok("created"));
//! }
//! ```

use std::future::Future;

/// Backoff strategies. Each strategy is an `Iterator<Item = Duration>`; an exhausted iterator
/// stops the retries.
pub mod strategy;

/// Retry future driving an [`Operation`] through a strategy.
pub mod retry;

/// Decides whether an error should be retried.
pub trait Condition<E> {
    fn can_retry(&self, error: &E) -> bool;
}

impl<E, F> Condition<E> for F
where
    F: Fn(&E) -> bool,
{
    fn can_retry(&self, error: &E) -> bool {
        self(error)
    }
}

/// Anything that can be run repeatedly, producing a new fallible [`Future`] each time.
pub trait Operation {
    type Item;
    type Error;
    type Future: Future<Output = Result<Self::Item, Self::Error>>;

    #[must_use = "futures do nothing unless you `.await` or poll them"]
    fn run(&mut self) -> Self::Future;
}

impl<T, E, R, F> Operation for F
where
    R: Future<Output = Result<T, E>>,
    F: FnMut() -> R,
{
    type Item = T;
    type Error = E;
    type Future = R;

    fn run(&mut self) -> Self::Future {
        self()
    }
}
