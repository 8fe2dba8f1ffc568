//! Abstraction over an append-only, per-stream log storage service (CloudWatch Logs and
//! anything that speaks its protocol).
//!
//! A destination is a `(group, stream)` pair. Every successful write returns a continuation
//! token which the next write to the same stream presents; a stale token is rejected with
//! [`ServiceError::InvalidToken`], usually carrying the token the service expects.

/// A single event on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLogEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub message: String,
}

impl InputLogEvent {
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }
}

/// A stream as reported by [`LogService::describe_log_streams`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStreamInfo {
    pub name: String,
    /// Token the next write must present. `None` for a stream that has never been written.
    pub upload_sequence_token: Option<String>,
}

/// Every way a call to the log service can fail, as far as delivery is concerned.
///
/// Delivery decides per variant whether to create the destination, refresh the token, back off
/// or give up, hence the enum is closed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Resource not found - {0}")]
    NotFound(String),

    #[error("Invalid sequence token (expected {expected:?}) - {message}")]
    InvalidToken {
        expected: Option<String>,
        message: String,
    },

    #[error("Resource already exists - {0}")]
    AlreadyExists(String),

    #[error("Rate limited - {0}")]
    RateLimited(String),

    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ServiceError::RateLimited(_))
    }
}

impl From<String> for ServiceError {
    fn from(value: String) -> Self {
        ServiceError::Other(value)
    }
}

#[trait_variant::make(LogService: Send)]
#[allow(dead_code)]
pub trait LocalLogService {
    /// Appends `events` (already ordered by timestamp) to the stream. `sequence_token` is the
    /// token returned by the previous successful write, `None` for the first write to a stream.
    /// Returns the token for the next write, if the service hands one out.
    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[InputLogEvent],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, ServiceError>;

    async fn create_log_group(&self, group: &str) -> Result<(), ServiceError>;

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), ServiceError>;

    /// Lists every stream of `group` whose name starts with `prefix`, following pagination.
    async fn describe_log_streams(
        &self,
        group: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<LogStreamInfo>, ServiceError>;
}
