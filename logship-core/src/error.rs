use logship_shared::logs::ServiceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Template Error - {0}")]
    Template(String),

    #[error("Record Error - {0}")]
    Record(String),

    /// The service answered with something delivery does not recover from.
    #[error("Service Error - {operation} failed: {source}")]
    Service {
        operation: &'static str,
        source: ServiceError,
    },

    #[error("Retries Exhausted - gave up after {recoveries} recoveries: {reason}")]
    RetriesExhausted { recoveries: usize, reason: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Join Error - {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Error::Join(value.to_string())
    }
}
