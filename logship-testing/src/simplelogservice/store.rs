//! Core log service state and implementation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use logship_shared::logs::{InputLogEvent, LogService, LogStreamInfo, ServiceError};

use super::error_injector::LogErrorInjector;

/// A request as the service received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRequest {
    Put {
        group: String,
        stream: String,
        events: usize,
        sequence_token: Option<String>,
    },
    CreateLogGroup {
        group: String,
    },
    CreateLogStream {
        group: String,
        stream: String,
    },
    DescribeLogStreams {
        group: String,
        prefix: Option<String>,
    },
}

/// A stream and everything written to it.
#[derive(Debug, Default, Clone)]
pub struct StreamState {
    pub events: Vec<InputLogEvent>,
    /// Token the next write must present.
    pub token: Option<String>,
}

/// Internal state of the log service.
#[derive(Debug, Default)]
pub struct LogState {
    pub(crate) groups: BTreeMap<String, BTreeMap<String, StreamState>>,
    /// Tokens are unique across all streams.
    pub(crate) last_token: u64,
    pub(crate) journal: Vec<LogRequest>,
}

impl LogState {
    fn next_token(&mut self) -> String {
        self.last_token += 1;
        format!("t{}", self.last_token)
    }

    fn stream_mut(&mut self, group: &str, stream: &str) -> Option<&mut StreamState> {
        self.groups.get_mut(group)?.get_mut(stream)
    }
}

/// Simple in-memory log service for testing.
///
/// Clones share the same state, so a test can keep one handle and give another to the code
/// under test.
#[derive(Debug, Clone, Default)]
pub struct SimpleLogService {
    state: Arc<RwLock<LogState>>,
    error_injector: Arc<LogErrorInjector>,
    in_flight_puts: Arc<AtomicUsize>,
    max_in_flight_puts: Arc<AtomicUsize>,
}

impl SimpleLogService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the error injector for this service.
    pub fn error_injector(&self) -> &Arc<LogErrorInjector> {
        &self.error_injector
    }

    /// Creates a group, bypassing the journal and error injection.
    pub fn create_group_now(&self, group: &str) {
        self.state
            .write()
            .groups
            .entry(group.to_string())
            .or_default();
    }

    /// Creates a stream (and its group), bypassing the journal and error injection.
    pub fn create_stream_now(&self, group: &str, stream: &str) {
        self.state
            .write()
            .groups
            .entry(group.to_string())
            .or_default()
            .entry(stream.to_string())
            .or_default();
    }

    /// Overwrites the token of an existing stream, as if someone else had written to it.
    pub fn set_stream_token(&self, group: &str, stream: &str, token: &str) {
        if let Some(stream) = self.state.write().stream_mut(group, stream) {
            stream.token = Some(token.to_string());
        }
    }

    pub fn stream_token(&self, group: &str, stream: &str) -> Option<String> {
        self.state
            .read()
            .groups
            .get(group)
            .and_then(|streams| streams.get(stream))
            .and_then(|stream| stream.token.clone())
    }

    /// Everything accepted by a stream, in write order.
    pub fn events(&self, group: &str, stream: &str) -> Vec<InputLogEvent> {
        self.state
            .read()
            .groups
            .get(group)
            .and_then(|streams| streams.get(stream))
            .map(|stream| stream.events.clone())
            .unwrap_or_default()
    }

    pub fn journal(&self) -> Vec<LogRequest> {
        self.state.read().journal.clone()
    }

    pub fn put_count(&self) -> usize {
        self.state
            .read()
            .journal
            .iter()
            .filter(|request| matches!(request, LogRequest::Put { .. }))
            .count()
    }

    /// Tokens presented by the puts to one stream, in arrival order.
    pub fn put_tokens(&self, group: &str, stream: &str) -> Vec<Option<String>> {
        self.state
            .read()
            .journal
            .iter()
            .filter_map(|request| match request {
                LogRequest::Put {
                    group: g,
                    stream: s,
                    sequence_token,
                    ..
                } if g == group && s == stream => Some(sequence_token.clone()),
                _ => None,
            })
            .collect()
    }

    /// Highest number of puts that were in flight at the same time.
    pub fn max_concurrent_puts(&self) -> usize {
        self.max_in_flight_puts.load(Ordering::SeqCst)
    }

    fn record(&self, request: LogRequest) {
        self.state.write().journal.push(request);
    }

    fn apply_put(
        &self,
        group: &str,
        stream: &str,
        events: &[InputLogEvent],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, ServiceError> {
        if self.error_injector.should_throttle_put() {
            return Err(ServiceError::RateLimited("injected throttling".to_string()));
        }
        if self.error_injector.should_fail_put() {
            return Err(ServiceError::Other("injected failure".to_string()));
        }
        if self.error_injector.should_not_find_put() {
            return Err(ServiceError::NotFound(format!(
                "injected: {group}/{stream} does not exist"
            )));
        }
        let withhold = self.error_injector.withholds_expected_token();
        if self.error_injector.should_reject_put_token() {
            return Err(ServiceError::InvalidToken {
                expected: None,
                message: "injected stale token".to_string(),
            });
        }

        let mut state = self.state.write();
        let next = state.next_token();
        let Some(streams) = state.groups.get_mut(group) else {
            return Err(ServiceError::NotFound(format!(
                "The specified log group does not exist: {group}"
            )));
        };
        let Some(target) = streams.get_mut(stream) else {
            return Err(ServiceError::NotFound(format!(
                "The specified log stream does not exist: {stream}"
            )));
        };

        if target.token.as_deref() != sequence_token {
            return Err(ServiceError::InvalidToken {
                expected: if withhold { None } else { target.token.clone() },
                message: format!(
                    "The given sequenceToken is invalid. The next expected sequenceToken is: {}",
                    target.token.as_deref().unwrap_or("null")
                ),
            });
        }

        target.events.extend_from_slice(events);
        target.token = Some(next.clone());
        Ok(Some(next))
    }
}

impl LogService for SimpleLogService {
    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[InputLogEvent],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, ServiceError> {
        self.record(LogRequest::Put {
            group: group.to_string(),
            stream: stream.to_string(),
            events: events.len(),
            sequence_token: sequence_token.map(str::to_string),
        });

        let in_flight = self.in_flight_puts.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight_puts.fetch_max(in_flight, Ordering::SeqCst);
        self.error_injector.apply_put_latency().await;
        let result = self.apply_put(group, stream, events, sequence_token);
        self.in_flight_puts.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn create_log_group(&self, group: &str) -> Result<(), ServiceError> {
        self.record(LogRequest::CreateLogGroup {
            group: group.to_string(),
        });

        if self.error_injector.should_throttle_create() {
            return Err(ServiceError::RateLimited("injected throttling".to_string()));
        }
        if self.error_injector.should_fail_create() {
            return Err(ServiceError::Other("injected failure".to_string()));
        }

        let mut state = self.state.write();
        if state.groups.contains_key(group) {
            return Err(ServiceError::AlreadyExists(format!(
                "The specified log group already exists: {group}"
            )));
        }
        state.groups.insert(group.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), ServiceError> {
        self.record(LogRequest::CreateLogStream {
            group: group.to_string(),
            stream: stream.to_string(),
        });

        if self.error_injector.should_throttle_create() {
            return Err(ServiceError::RateLimited("injected throttling".to_string()));
        }
        if self.error_injector.should_fail_create() {
            return Err(ServiceError::Other("injected failure".to_string()));
        }
        if self.error_injector.should_not_find_stream_create() {
            return Err(ServiceError::NotFound(format!(
                "injected: log group {group} is not visible yet"
            )));
        }

        let mut state = self.state.write();
        let Some(streams) = state.groups.get_mut(group) else {
            return Err(ServiceError::NotFound(format!(
                "The specified log group does not exist: {group}"
            )));
        };
        if streams.contains_key(stream) {
            return Err(ServiceError::AlreadyExists(format!(
                "The specified log stream already exists: {stream}"
            )));
        }
        streams.insert(stream.to_string(), StreamState::default());
        Ok(())
    }

    async fn describe_log_streams(
        &self,
        group: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<LogStreamInfo>, ServiceError> {
        self.record(LogRequest::DescribeLogStreams {
            group: group.to_string(),
            prefix: prefix.map(str::to_string),
        });

        if self.error_injector.should_throttle_describe() {
            return Err(ServiceError::RateLimited("injected throttling".to_string()));
        }
        if self.error_injector.should_fail_describe() {
            return Err(ServiceError::Other("injected failure".to_string()));
        }

        let state = self.state.read();
        let Some(streams) = state.groups.get(group) else {
            return Err(ServiceError::NotFound(format!(
                "The specified log group does not exist: {group}"
            )));
        };
        Ok(streams
            .iter()
            .filter(|(name, _)| prefix.is_none_or(|prefix| name.starts_with(prefix)))
            .map(|(name, stream)| LogStreamInfo {
                name: name.clone(),
                upload_sequence_token: stream.token.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn events(messages: &[&str]) -> Vec<InputLogEvent> {
        messages
            .iter()
            .map(|message| InputLogEvent::new(1, *message))
            .collect()
    }

    #[tokio::test]
    async fn test_put_requires_destination() {
        let service = SimpleLogService::new();
        let err = service
            .put_log_events("app", "s", &events(&["a"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        service.create_group_now("app");
        let err = service
            .put_log_events("app", "s", &events(&["a"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(service.put_count(), 2);
    }

    #[tokio::test]
    async fn test_token_chain() {
        let service = SimpleLogService::new();
        service.create_stream_now("app", "s");

        let first = service
            .put_log_events("app", "s", &events(&["a"]), None)
            .await
            .unwrap();
        let second = service
            .put_log_events("app", "s", &events(&["b"]), first.as_deref())
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(service.stream_token("app", "s"), second);

        let err = service
            .put_log_events("app", "s", &events(&["c"]), first.as_deref())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::InvalidToken {
                expected: second.clone(),
                message: format!(
                    "The given sequenceToken is invalid. The next expected sequenceToken is: {}",
                    second.unwrap()
                ),
            }
        );
        assert_eq!(service.events("app", "s"), events(&["a", "b"]));
        assert_eq!(service.put_tokens("app", "s"), vec![None, first.clone(), first]);
    }

    #[tokio::test]
    async fn test_tokens_are_unique_across_streams() {
        let service = SimpleLogService::new();
        service.create_stream_now("app", "a");
        service.create_stream_now("app", "b");
        let a = service
            .put_log_events("app", "a", &events(&["x"]), None)
            .await
            .unwrap();
        let b = service
            .put_log_events("app", "b", &events(&["x"]), None)
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_withheld_expected_token() {
        let service = SimpleLogService::new();
        service.create_stream_now("app", "s");
        service.set_stream_token("app", "s", "t9");
        service.error_injector().withhold_expected_token(true);

        let err = service
            .put_log_events("app", "s", &events(&["a"]), Some("t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidToken { expected: None, .. }));
    }

    #[tokio::test]
    async fn test_create_group_and_stream() {
        let service = SimpleLogService::new();
        assert!(matches!(
            service.create_log_stream("app", "s").await,
            Err(ServiceError::NotFound(_))
        ));
        service.create_log_group("app").await.unwrap();
        assert!(matches!(
            service.create_log_group("app").await,
            Err(ServiceError::AlreadyExists(_))
        ));
        service.create_log_stream("app", "s").await.unwrap();
        assert!(matches!(
            service.create_log_stream("app", "s").await,
            Err(ServiceError::AlreadyExists(_))
        ));
        assert_eq!(
            service.journal().first(),
            Some(&LogRequest::CreateLogStream {
                group: "app".to_string(),
                stream: "s".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_describe_filters_by_prefix() {
        let service = SimpleLogService::new();
        service.create_stream_now("app", "host-a");
        service.create_stream_now("app", "host-a-canary");
        service.create_stream_now("app", "other");
        service.set_stream_token("app", "host-a", "t3");

        let streams = service
            .describe_log_streams("app", Some("host-a"))
            .await
            .unwrap();
        assert_eq!(
            streams,
            vec![
                LogStreamInfo {
                    name: "host-a".to_string(),
                    upload_sequence_token: Some("t3".to_string()),
                },
                LogStreamInfo {
                    name: "host-a-canary".to_string(),
                    upload_sequence_token: None,
                },
            ]
        );
        assert_eq!(
            service.describe_log_streams("app", None).await.unwrap().len(),
            3
        );
        assert!(matches!(
            service.describe_log_streams("missing", None).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_errors() {
        let service = SimpleLogService::new();
        service.create_stream_now("app", "s");
        service.error_injector().throttle_puts(1);
        service.error_injector().fail_describes(1);

        assert!(matches!(
            service.put_log_events("app", "s", &events(&["a"]), None).await,
            Err(ServiceError::RateLimited(_))
        ));
        assert!(
            service
                .put_log_events("app", "s", &events(&["a"]), None)
                .await
                .is_ok()
        );
        assert!(matches!(
            service.describe_log_streams("app", None).await,
            Err(ServiceError::Other(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_stream_create_not_found() {
        let service = SimpleLogService::new();
        service.create_group_now("app");
        service.error_injector().fail_stream_creates_not_found(1);

        assert!(matches!(
            service.create_log_stream("app", "s").await,
            Err(ServiceError::NotFound(_))
        ));
        service.create_log_stream("app", "s").await.unwrap();
        assert_eq!(service.stream_token("app", "s"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_puts_are_counted() {
        let service = SimpleLogService::new();
        service.create_stream_now("app", "a");
        service.create_stream_now("app", "b");
        service.error_injector().set_put_latency(100);

        let (xs, ys) = (events(&["x"]), events(&["y"]));
        let (a, b) = tokio::join!(
            service.put_log_events("app", "a", &xs, None),
            service.put_log_events("app", "b", &ys, None),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(service.max_concurrent_puts(), 2);

        let start = tokio::time::Instant::now();
        let token = service.stream_token("app", "a");
        service
            .put_log_events("app", "a", &events(&["z"]), token.as_deref())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
