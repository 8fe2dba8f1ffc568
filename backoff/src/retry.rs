use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project::pin_project;
use tokio::time::{Instant, Sleep, sleep_until};

use crate::{Condition, Operation};

/// Where a [`Retry`] currently is: waiting on the operation, or sleeping before the next run.
///
/// ```no_rust
///   run(op) --Ok--> done(Ok)
///      |
///     Err --not retryable--> done(Err)
///      |
///   backoff.next() --None--> done(Err)
///      |
///   Some(d) --> sleep(d) --> run(op)
/// ```
#[pin_project(project = StateProj)]
enum State<F> {
    Running(#[pin] F),
    Sleeping(#[pin] Sleep),
}

/// A future that reruns an [`Operation`] under a backoff strategy while its errors satisfy the
/// [`Condition`]. Resolves to the first success, or to the last error once the error is not
/// retryable or the strategy is exhausted.
#[pin_project]
pub struct Retry<I, O, C>
where
    O: Operation,
{
    #[pin]
    state: State<O::Future>,
    backoff: I,
    operation: O,
    condition: C,
}

impl<I, O, C> Retry<I, O, C>
where
    I: Iterator<Item = Duration>,
    O: Operation,
    C: Condition<O::Error>,
{
    pub fn new<B>(backoff: B, mut operation: O, condition: C) -> Self
    where
        B: IntoIterator<IntoIter = I, Item = Duration>,
    {
        Self {
            state: State::Running(operation.run()),
            backoff: backoff.into_iter(),
            operation,
            condition,
        }
    }
}

impl<I, O, C> Future for Retry<I, O, C>
where
    I: Iterator<Item = Duration>,
    O: Operation,
    C: Condition<O::Error>,
{
    type Output = Result<O::Item, O::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        loop {
            match this.state.as_mut().project() {
                StateProj::Running(fut) => match fut.poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(item)) => return Poll::Ready(Ok(item)),
                    Poll::Ready(Err(err)) => {
                        if !this.condition.can_retry(&err) {
                            return Poll::Ready(Err(err));
                        }
                        let Some(delay) = this.backoff.next() else {
                            return Poll::Ready(Err(err));
                        };
                        this.state
                            .set(State::Sleeping(sleep_until(Instant::now() + delay)));
                    }
                },
                StateProj::Sleeping(sleep) => match sleep.poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(()) => this.state.set(State::Running(this.operation.run())),
                },
            }
        }
    }
}
