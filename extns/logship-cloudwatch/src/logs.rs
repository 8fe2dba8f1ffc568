//! The four CloudWatch Logs operations delivery needs, on top of the SDK client.
use aws_sdk_cloudwatchlogs::Client;
use aws_sdk_cloudwatchlogs::operation::create_log_group::CreateLogGroupError;
use aws_sdk_cloudwatchlogs::operation::create_log_stream::CreateLogStreamError;
use aws_sdk_cloudwatchlogs::operation::describe_log_streams::DescribeLogStreamsError;
use aws_sdk_cloudwatchlogs::operation::put_log_events::PutLogEventsError;
use aws_sdk_cloudwatchlogs::types::InputLogEvent as CwInputLogEvent;
use logship_shared::logs::{InputLogEvent, LogService, LogStreamInfo, ServiceError};
use tracing::{debug, warn};

use crate::client::{CloudWatchConfig, create_cloudwatch_client};
use crate::{Error, Result, classify};

/// CloudWatch Logs as a [`LogService`].
#[derive(Clone, Debug)]
pub struct CloudWatchLogs {
    client: Client,
}

impl CloudWatchLogs {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn connect(config: &CloudWatchConfig) -> Result<Self> {
        Ok(Self::new(create_cloudwatch_client(config).await?))
    }

    pub async fn put_events(
        &self,
        group: &str,
        stream: &str,
        events: &[InputLogEvent],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>> {
        let log_events = events
            .iter()
            .map(|event| {
                CwInputLogEvent::builder()
                    .timestamp(event.timestamp)
                    .message(event.message.as_str())
                    .build()
                    .map_err(|e| Error::Other(format!("Failed to build log event: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .client
            .put_log_events()
            .log_group_name(group)
            .log_stream_name(stream)
            .set_sequence_token(sequence_token.map(str::to_string))
            .set_log_events(Some(log_events))
            .send()
            .await
            .map_err(|err| {
                classify(err, |e, message| match e {
                    PutLogEventsError::InvalidSequenceTokenException(stale) => {
                        Some(Error::InvalidSequenceToken {
                            expected: stale.expected_sequence_token().map(str::to_string),
                            message: message.to_string(),
                        })
                    }
                    PutLogEventsError::ResourceNotFoundException(_) => {
                        Some(Error::ResourceNotFound(message.to_string()))
                    }
                    PutLogEventsError::ServiceUnavailableException(_) => {
                        Some(Error::Throttling(message.to_string()))
                    }
                    _ => None,
                })
            })?;

        if let Some(rejected) = output.rejected_log_events_info() {
            warn!(
                group,
                stream,
                too_old_end_index = ?rejected.too_old_log_event_end_index(),
                too_new_start_index = ?rejected.too_new_log_event_start_index(),
                expired_end_index = ?rejected.expired_log_event_end_index(),
                "CloudWatch Logs rejected part of the batch"
            );
        }

        let next = output.next_sequence_token().map(str::to_string);
        debug!(group, stream, events = events.len(), next_token = ?next, "Put log events");
        Ok(next)
    }

    pub async fn create_group(&self, group: &str) -> Result<()> {
        self.client
            .create_log_group()
            .log_group_name(group)
            .send()
            .await
            .map_err(|err| {
                classify(err, |e: &CreateLogGroupError, message| {
                    if e.is_resource_already_exists_exception() {
                        Some(Error::ResourceAlreadyExists(message.to_string()))
                    } else if e.is_service_unavailable_exception()
                        || e.is_limit_exceeded_exception()
                    {
                        Some(Error::Throttling(message.to_string()))
                    } else {
                        None
                    }
                })
            })?;
        Ok(())
    }

    pub async fn create_stream(&self, group: &str, stream: &str) -> Result<()> {
        self.client
            .create_log_stream()
            .log_group_name(group)
            .log_stream_name(stream)
            .send()
            .await
            .map_err(|err| {
                classify(err, |e: &CreateLogStreamError, message| {
                    if e.is_resource_already_exists_exception() {
                        Some(Error::ResourceAlreadyExists(message.to_string()))
                    } else if e.is_resource_not_found_exception() {
                        Some(Error::ResourceNotFound(message.to_string()))
                    } else if e.is_service_unavailable_exception() {
                        Some(Error::Throttling(message.to_string()))
                    } else {
                        None
                    }
                })
            })?;
        Ok(())
    }

    /// Follows `nextToken` until every page has been read.
    pub async fn describe_streams(
        &self,
        group: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<LogStreamInfo>> {
        let mut streams = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .describe_log_streams()
                .log_group_name(group)
                .set_log_stream_name_prefix(prefix.map(str::to_string))
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|err| {
                    classify(err, |e: &DescribeLogStreamsError, message| {
                        if e.is_resource_not_found_exception() {
                            Some(Error::ResourceNotFound(message.to_string()))
                        } else if e.is_service_unavailable_exception() {
                            Some(Error::Throttling(message.to_string()))
                        } else {
                            None
                        }
                    })
                })?;

            streams.extend(output.log_streams().iter().filter_map(|stream| {
                stream.log_stream_name().map(|name| LogStreamInfo {
                    name: name.to_string(),
                    upload_sequence_token: stream.upload_sequence_token().map(str::to_string),
                })
            }));

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(streams)
    }
}

impl LogService for CloudWatchLogs {
    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[InputLogEvent],
        sequence_token: Option<&str>,
    ) -> std::result::Result<Option<String>, ServiceError> {
        Ok(self.put_events(group, stream, events, sequence_token).await?)
    }

    async fn create_log_group(&self, group: &str) -> std::result::Result<(), ServiceError> {
        Ok(self.create_group(group).await?)
    }

    async fn create_log_stream(
        &self,
        group: &str,
        stream: &str,
    ) -> std::result::Result<(), ServiceError> {
        Ok(self.create_stream(group, stream).await?)
    }

    async fn describe_log_streams(
        &self,
        group: &str,
        prefix: Option<&str>,
    ) -> std::result::Result<Vec<LogStreamInfo>, ServiceError> {
        Ok(self.describe_streams(group, prefix).await?)
    }
}
