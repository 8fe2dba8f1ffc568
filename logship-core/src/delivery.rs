//! Put-with-recovery for a single batch.
//!
//! ```text
//!            +---------------- NotFound ----------------> CREATE_DESTINATION --+
//!            |                                                                 |
//!  ATTEMPT --+---------------- InvalidToken ------------> REFRESH_TOKEN -------+--> ATTEMPT
//!     |      |                                                                 |
//!     |      +---------------- RateLimited -------------> BACKOFF -------------+
//!     |
//!     +-- Ok --> DONE          anything else --> fatal
//! ```
//!
//! Every recovery counts against the batch's budget (`max_attempts` recoveries within
//! `max_elapsed`); a batch that runs out of budget fails with [`Error::RetriesExhausted`]. The
//! cancellation token is checked on every transition and while waiting.
use std::future::Future;
use std::sync::Arc;

use backoff::retry::Retry;
use logship_shared::logs::{LogService, ServiceError};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::batcher::Batch;
use crate::config::RetryConfig;
use crate::destination::DestinationKey;
use crate::error::Error;
use crate::governor::RateGovernor;
use crate::tokens::SequenceTokenStore;

#[derive(Debug, Clone, PartialEq)]
enum DeliveryState {
    Attempt,
    CreateDestination,
    /// Carries the token the service said it expects, when it said so.
    RefreshToken(Option<String>),
    Backoff,
    Done(Option<String>),
}

/// Tracks how much of its recovery budget a batch has used.
struct Budget {
    started: Instant,
    recoveries: usize,
    max_recoveries: usize,
    max_elapsed: std::time::Duration,
}

impl Budget {
    fn new(retry: &RetryConfig) -> Self {
        Self {
            started: Instant::now(),
            recoveries: 0,
            max_recoveries: usize::from(retry.max_attempts),
            max_elapsed: retry.max_elapsed,
        }
    }

    fn spend(&mut self, cause: &ServiceError) -> Result<()> {
        self.recoveries += 1;
        if self.recoveries > self.max_recoveries || self.started.elapsed() >= self.max_elapsed {
            return Err(self.exhausted(cause));
        }
        Ok(())
    }

    fn exhausted(&self, cause: &ServiceError) -> Error {
        Error::RetriesExhausted {
            recoveries: self.recoveries,
            reason: cause.to_string(),
        }
    }
}

/// Delivers batches to a [`LogService`], keeping the [`SequenceTokenStore`] up to date.
pub struct DeliveryEngine<S> {
    service: S,
    tokens: SequenceTokenStore,
    governor: Arc<RateGovernor>,
    retry: RetryConfig,
}

impl<S> DeliveryEngine<S>
where
    S: LogService + Sync,
{
    pub fn new(
        service: S,
        tokens: SequenceTokenStore,
        governor: Arc<RateGovernor>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            service,
            tokens,
            governor,
            retry,
        }
    }

    pub fn tokens(&self) -> &SequenceTokenStore {
        &self.tokens
    }

    /// Delivers the batch, recovering from missing destinations, stale tokens and throttling.
    /// Returns the token the next write to this destination must present.
    pub async fn deliver(
        &self,
        batch: &Batch,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let key = batch.key();
        let mut budget = Budget::new(&self.retry);
        let mut backoff = self.governor.backoff();
        let mut last_throttle: Option<ServiceError> = None;
        let mut state = DeliveryState::Attempt;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            state = match state {
                DeliveryState::Attempt => {
                    let token = self.tokens.get(key);
                    self.governor.throttle(cancel).await?;
                    debug!(%key, events = batch.len(), token = ?token, "Putting log events");

                    match self
                        .service
                        .put_log_events(&key.group, &key.stream, batch.events(), token.as_deref())
                        .await
                    {
                        Ok(next) => {
                            match &next {
                                Some(next) => self.tokens.put(key, next.as_str()),
                                None => self.tokens.forget(key),
                            }
                            DeliveryState::Done(next)
                        }
                        Err(err) => {
                            let next = match &err {
                                ServiceError::NotFound(_) => DeliveryState::CreateDestination,
                                ServiceError::InvalidToken { expected, .. } => {
                                    DeliveryState::RefreshToken(expected.clone())
                                }
                                ServiceError::RateLimited(_) => {
                                    last_throttle = Some(err.clone());
                                    DeliveryState::Backoff
                                }
                                ServiceError::AlreadyExists(_) | ServiceError::Other(_) => {
                                    return Err(Error::Service {
                                        operation: "PutLogEvents",
                                        source: err,
                                    });
                                }
                            };
                            debug!(%key, error = %err, next = ?next, "Put rejected, recovering");
                            budget.spend(&err)?;
                            next
                        }
                    }
                }

                DeliveryState::CreateDestination => {
                    self.create_destination(key, cancel, &mut budget).await?
                }

                DeliveryState::RefreshToken(expected) => {
                    self.refresh_token(key, expected, cancel).await?
                }

                DeliveryState::Backoff => {
                    let cause = last_throttle
                        .take()
                        .unwrap_or_else(|| ServiceError::RateLimited(String::new()));
                    let Some(delay) = backoff.next() else {
                        return Err(budget.exhausted(&cause));
                    };
                    warn!(
                        %key,
                        attempt = backoff.current_attempt(),
                        ?delay,
                        "Rate limited by the log service, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = sleep(delay) => {}
                    }
                    DeliveryState::Attempt
                }

                DeliveryState::Done(next) => return Ok(next),
            };
        }
    }

    /// Creates the group and the stream, tolerating both already existing, and forgets the
    /// token since a fresh stream takes its first write without one.
    async fn create_destination(
        &self,
        key: &DestinationKey,
        cancel: &CancellationToken,
        budget: &mut Budget,
    ) -> Result<DeliveryState> {
        let service = &self.service;
        let (group, stream) = (key.group.as_str(), key.stream.as_str());

        match self
            .with_throttle_retry(cancel, move || service.create_log_group(group))
            .await?
        {
            Ok(()) => info!(group, "Created log group"),
            Err(ServiceError::AlreadyExists(_)) => debug!(group, "Log group already exists"),
            Err(err) => return Err(fatal("CreateLogGroup", err)),
        }

        match self
            .with_throttle_retry(cancel, move || service.create_log_stream(group, stream))
            .await?
        {
            Ok(()) => info!(group, stream, "Created log stream"),
            Err(ServiceError::AlreadyExists(_)) => {
                debug!(group, stream, "Log stream already exists")
            }
            // the group we just created is not visible yet
            Err(err @ ServiceError::NotFound(_)) => {
                budget.spend(&err)?;
                return Ok(DeliveryState::CreateDestination);
            }
            Err(err) => return Err(fatal("CreateLogStream", err)),
        }

        self.tokens.forget(key);
        Ok(DeliveryState::Attempt)
    }

    /// Stores the token the service expects, asking the service for it when the rejection did
    /// not include it.
    async fn refresh_token(
        &self,
        key: &DestinationKey,
        expected: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<DeliveryState> {
        if let Some(expected) = expected {
            info!(%key, token = expected.as_str(), "Using the sequence token from the rejection");
            self.tokens.put(key, expected);
            return Ok(DeliveryState::Attempt);
        }

        let service = &self.service;
        let (group, stream) = (key.group.as_str(), key.stream.as_str());
        let streams = match self
            .with_throttle_retry(cancel, move || {
                service.describe_log_streams(group, Some(stream))
            })
            .await?
        {
            Ok(streams) => streams,
            Err(ServiceError::NotFound(_)) => return Ok(DeliveryState::CreateDestination),
            Err(err) => return Err(fatal("DescribeLogStreams", err)),
        };

        match streams.into_iter().find(|info| info.name == key.stream) {
            Some(info) => {
                info!(%key, token = ?info.upload_sequence_token, "Refreshed sequence token");
                match info.upload_sequence_token {
                    Some(token) => self.tokens.put(key, token),
                    None => self.tokens.forget(key),
                }
                Ok(DeliveryState::Attempt)
            }
            None => Ok(DeliveryState::CreateDestination),
        }
    }

    /// Runs a control-plane call, retrying it with the governor's back-off while the service
    /// throttles it. The inner result is the call's own outcome; the outer error is
    /// cancellation.
    async fn with_throttle_retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<std::result::Result<T, ServiceError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ServiceError>>,
    {
        let retry = Retry::new(self.governor.backoff(), operation, ServiceError::is_rate_limited);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            outcome = retry => Ok(outcome),
        }
    }
}

fn fatal(operation: &'static str, err: ServiceError) -> Error {
    match err {
        ServiceError::RateLimited(reason) => Error::RetriesExhausted {
            recoveries: 0,
            reason: format!("{operation} kept being throttled: {reason}"),
        },
        err => Error::Service {
            operation,
            source: err,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use logship_shared::logs::InputLogEvent;
    use logship_testing::simplelogservice::{LogRequest, SimpleLogService};
    use serde_json::Map;
    use test_log::test;

    use super::*;
    use crate::batcher::Batcher;
    use crate::config::ShipperConfig;
    use crate::record::Record;

    const MIN_INTERVAL: Duration = Duration::from_millis(100);

    fn retry_config(max_attempts: u16) -> RetryConfig {
        RetryConfig {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(400),
            factor: 2.0,
            jitter: 0.0,
            max_attempts,
            max_elapsed: Duration::from_secs(600),
        }
    }

    fn engine(service: SimpleLogService, max_attempts: u16) -> DeliveryEngine<SimpleLogService> {
        let retry = retry_config(max_attempts);
        DeliveryEngine::new(
            service,
            SequenceTokenStore::new(),
            Arc::new(RateGovernor::new(MIN_INTERVAL, retry.clone())),
            retry,
        )
    }

    fn batch(stream: &str, messages: &[&str]) -> Batch {
        let config = ShipperConfig::new("app", stream);
        let records = messages
            .iter()
            .enumerate()
            .map(|(i, message)| {
                Record::new(Utc.timestamp_millis_opt(i as i64).unwrap(), Map::new())
                    .with_rendered_message(*message)
            })
            .collect();
        let mut batches = Batcher::new(&config).unwrap().form_batches(records);
        assert_eq!(batches.len(), 1);
        batches.remove(0)
    }

    fn key(stream: &str) -> DestinationKey {
        DestinationKey::new("app", stream)
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_new_stream_is_created_then_token_chains() {
        let service = SimpleLogService::new();
        let engine = engine(service.clone(), 5);
        let cancel = CancellationToken::new();

        let token1 = engine.deliver(&batch("host-a", &["one"]), &cancel).await.unwrap();
        assert!(token1.is_some());
        assert_eq!(engine.tokens().get(&key("host-a")), token1);

        let token2 = engine.deliver(&batch("host-a", &["two"]), &cancel).await.unwrap();
        assert_ne!(token1, token2);

        let puts: Vec<_> = service
            .journal()
            .into_iter()
            .filter_map(|request| match request {
                LogRequest::Put { sequence_token, .. } => Some(sequence_token),
                _ => None,
            })
            .collect();
        // not found, retry without token, then chained on token1
        assert_eq!(puts, vec![None, None, token1.clone()]);
        assert!(service.journal().contains(&LogRequest::CreateLogGroup {
            group: "app".to_string()
        }));
        assert_eq!(
            service.events("app", "host-a"),
            vec![InputLogEvent::new(0, "one"), InputLogEvent::new(0, "two")]
        );
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_existing_group_and_stream_are_tolerated() {
        let service = SimpleLogService::new();
        service.create_group_now("app");
        service.create_stream_now("app", "host-a");
        // the stream exists but puts still report it missing once
        service.error_injector().fail_puts_not_found(1);
        let engine = engine(service.clone(), 5);

        let token = engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap();
        assert!(token.is_some());
        assert_eq!(service.events("app", "host-a").len(), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_invalid_token_hint_is_used_without_describe() {
        let service = SimpleLogService::new();
        service.create_group_now("app");
        service.create_stream_now("app", "host-a");
        service.set_stream_token("app", "host-a", "t7");
        let engine = engine(service.clone(), 5);
        engine.tokens().put(&key("host-a"), "stale");

        engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap();

        let journal = service.journal();
        assert!(
            !journal
                .iter()
                .any(|request| matches!(request, LogRequest::DescribeLogStreams { .. }))
        );
        let tokens: Vec<_> = journal
            .iter()
            .filter_map(|request| match request {
                LogRequest::Put { sequence_token, .. } => Some(sequence_token.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, vec![Some("stale".to_string()), Some("t7".to_string())]);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_invalid_token_without_hint_falls_back_to_describe() {
        let service = SimpleLogService::new();
        service.create_group_now("app");
        service.create_stream_now("app", "host-a");
        service.create_stream_now("app", "host-a-canary");
        service.set_stream_token("app", "host-a", "t7");
        service.set_stream_token("app", "host-a-canary", "c1");
        service.error_injector().withhold_expected_token(true);
        let engine = engine(service.clone(), 5);
        engine.tokens().put(&key("host-a"), "stale");

        engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(service.journal().contains(&LogRequest::DescribeLogStreams {
            group: "app".to_string(),
            prefix: Some("host-a".to_string()),
        }));
        assert_eq!(service.events("app", "host-a").len(), 1);
        assert!(service.events("app", "host-a-canary").is_empty());
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_describe_without_the_stream_recreates_it() {
        let service = SimpleLogService::new();
        service.create_group_now("app");
        service.error_injector().fail_puts_invalid_token(1);
        service.error_injector().withhold_expected_token(true);
        let engine = engine(service.clone(), 5);

        engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap();
        assert!(service.journal().contains(&LogRequest::CreateLogStream {
            group: "app".to_string(),
            stream: "host-a".to_string(),
        }));
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_stream_create_racing_the_new_group_is_recovered() {
        let service = SimpleLogService::new();
        service.error_injector().fail_stream_creates_not_found(1);
        let engine = engine(service.clone(), 5);

        let token = engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap();
        assert!(token.is_some());

        let group = || LogRequest::CreateLogGroup {
            group: "app".to_string(),
        };
        let stream = || LogRequest::CreateLogStream {
            group: "app".to_string(),
            stream: "host-a".to_string(),
        };
        let creates: Vec<_> = service
            .journal()
            .into_iter()
            .filter(|request| !matches!(request, LogRequest::Put { .. }))
            .collect();
        assert_eq!(creates, vec![group(), stream(), group(), stream()]);
        assert_eq!(service.put_count(), 2);
        assert_eq!(service.events("app", "host-a").len(), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_stream_create_not_found_spends_the_budget() {
        let service = SimpleLogService::new();
        service.error_injector().fail_stream_creates_not_found(usize::MAX);
        let engine = engine(service.clone(), 2);

        let err = engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { recoveries: 3, .. }), "{err}");
        assert_eq!(service.put_count(), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_throttled_describe_is_retried() {
        let service = SimpleLogService::new();
        service.create_stream_now("app", "host-a");
        service.set_stream_token("app", "host-a", "t7");
        service.error_injector().withhold_expected_token(true);
        service.error_injector().throttle_describes(2);
        let engine = engine(service.clone(), 5);
        engine.tokens().put(&key("host-a"), "stale");

        let token = engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap();
        assert!(token.is_some());

        let describes = service
            .journal()
            .iter()
            .filter(|request| matches!(request, LogRequest::DescribeLogStreams { .. }))
            .count();
        assert_eq!(describes, 3);
        assert_eq!(
            service.put_tokens("app", "host-a"),
            vec![Some("stale".to_string()), Some("t7".to_string())]
        );
        assert_eq!(service.events("app", "host-a").len(), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_failing_describe_is_fatal() {
        let service = SimpleLogService::new();
        service.create_stream_now("app", "host-a");
        service.set_stream_token("app", "host-a", "t7");
        service.error_injector().withhold_expected_token(true);
        service.error_injector().fail_describes(1);
        let engine = engine(service.clone(), 5);
        engine.tokens().put(&key("host-a"), "stale");

        let err = engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Service {
                operation: "DescribeLogStreams",
                source: ServiceError::Other(_)
            }
        ));
        assert_eq!(service.put_count(), 1);
        assert!(service.events("app", "host-a").is_empty());
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_rate_limited_then_success() {
        let service = SimpleLogService::new();
        service.create_group_now("app");
        service.create_stream_now("app", "host-a");
        service.error_injector().throttle_puts(3);
        let engine = engine(service.clone(), 5);

        let start = Instant::now();
        engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap();

        // four puts, each spaced by the governor
        assert_eq!(service.put_count(), 4);
        assert!(start.elapsed() >= MIN_INTERVAL * 3);
        assert_eq!(service.events("app", "host-a").len(), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_persistent_throttling_exhausts_the_budget() {
        let service = SimpleLogService::new();
        service.create_group_now("app");
        service.create_stream_now("app", "host-a");
        service.error_injector().throttle_puts(usize::MAX);
        let engine = engine(service.clone(), 3);

        let err = engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { .. }), "{err}");
        assert_eq!(service.put_count(), 4);
        assert!(service.events("app", "host-a").is_empty());
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_elapsed_ceiling() {
        let service = SimpleLogService::new();
        service.create_group_now("app");
        service.create_stream_now("app", "host-a");
        service.error_injector().throttle_puts(usize::MAX);
        let mut retry = retry_config(u16::MAX);
        retry.max_elapsed = Duration::from_secs(2);
        let engine = DeliveryEngine::new(
            service.clone(),
            SequenceTokenStore::new(),
            Arc::new(RateGovernor::new(MIN_INTERVAL, retry.clone())),
            retry,
        );

        let start = Instant::now();
        let err = engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_other_errors_are_fatal_and_not_retried() {
        let service = SimpleLogService::new();
        service.error_injector().fail_puts(1);
        let engine = engine(service.clone(), 5);

        let err = engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Service {
                operation: "PutLogEvents",
                source: ServiceError::Other(_)
            }
        ));
        assert_eq!(service.put_count(), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_throttled_creates_are_retried() {
        let service = SimpleLogService::new();
        service.error_injector().throttle_creates(2);
        let engine = engine(service.clone(), 5);

        engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(service.events("app", "host-a").len(), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_failing_create_is_fatal() {
        let service = SimpleLogService::new();
        service.error_injector().fail_creates(1);
        let engine = engine(service.clone(), 5);

        let err = engine
            .deliver(&batch("host-a", &["one"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Service {
                operation: "CreateLogGroup",
                ..
            }
        ));
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_cancelled_during_backoff() {
        let service = SimpleLogService::new();
        service.create_group_now("app");
        service.create_stream_now("app", "host-a");
        service.error_injector().throttle_puts(usize::MAX);
        let mut retry = retry_config(10);
        retry.initial_interval = Duration::from_secs(30);
        retry.max_interval = Duration::from_secs(30);
        let engine = DeliveryEngine::new(
            service.clone(),
            SequenceTokenStore::new(),
            Arc::new(RateGovernor::new(MIN_INTERVAL, retry.clone())),
            retry,
        );

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = engine
            .deliver(&batch("host-a", &["one"]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(30));
        assert_eq!(service.put_count(), 1);
    }

    #[test(tokio::test)]
    async fn test_already_cancelled_does_nothing() {
        let service = SimpleLogService::new();
        let engine = engine(service.clone(), 5);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .deliver(&batch("host-a", &["one"]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(service.journal().is_empty());
    }
}
