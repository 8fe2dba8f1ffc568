//! Amazon CloudWatch Logs client for logship.
//!
//! Wraps `aws-sdk-cloudwatchlogs` behind the [`logship_shared::logs::LogService`] trait and
//! folds the SDK's per-operation errors into a small [`Error`] enum that delivery can act on:
//! missing destinations, stale sequence tokens and throttling are told apart from everything
//! else.
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use logship_shared::logs::ServiceError;

pub mod client;
pub mod logs;

/// Error codes CloudWatch Logs (and the AWS front door) use for "slow down".
const THROTTLING_CODES: &[&str] = &[
    "ThrottlingException",
    "ServiceUnavailableException",
    "LimitExceededException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Resource not found - {0}")]
    ResourceNotFound(String),

    #[error("Invalid sequence token, expected {expected:?} - {message}")]
    InvalidSequenceToken {
        expected: Option<String>,
        message: String,
    },

    #[error("Resource already exists - {0}")]
    ResourceAlreadyExists(String),

    #[error("Throttled by CloudWatch Logs - {0}")]
    Throttling(String),

    #[error("Failed with CloudWatch Logs error - {0}")]
    CloudWatch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Other(value)
    }
}

impl From<Error> for ServiceError {
    fn from(value: Error) -> Self {
        match value {
            Error::ResourceNotFound(msg) => ServiceError::NotFound(msg),
            Error::InvalidSequenceToken { expected, message } => {
                ServiceError::InvalidToken { expected, message }
            }
            Error::ResourceAlreadyExists(msg) => ServiceError::AlreadyExists(msg),
            Error::Throttling(msg) => ServiceError::RateLimited(msg),
            Error::CloudWatch(_) | Error::InvalidConfig(_) | Error::Other(_) => {
                ServiceError::Other(value.to_string())
            }
        }
    }
}

/// Classifies an SDK failure. `modeled` gets first look at the operation's modeled service
/// error, since errors built from the service model do not always carry an error code; the
/// error code decides otherwise.
pub(crate) fn classify<E, R>(
    err: SdkError<E, R>,
    modeled: impl FnOnce(&E, &str) -> Option<Error>,
) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    if let Some(service_err) = err.as_service_error()
        && let Some(classified) = modeled(service_err, &message)
    {
        return classified;
    }

    match err.code() {
        Some("ResourceNotFoundException") => Error::ResourceNotFound(message),
        Some("ResourceAlreadyExistsException") => Error::ResourceAlreadyExists(message),
        Some("InvalidSequenceTokenException") => Error::InvalidSequenceToken {
            expected: None,
            message,
        },
        Some(code) if THROTTLING_CODES.contains(&code) => Error::Throttling(message),
        _ => Error::CloudWatch(message),
    }
}
