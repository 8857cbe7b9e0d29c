use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TelemetryError>;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid duration: {0}")]
    Parse(#[from] ParseError),

    #[error("metrics query failed: {0}")]
    Query(#[from] QueryError),

    #[error("invalid metric identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unable to read the configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to parse the configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Rejection of a malformed duration string such as `5x` or `1.5h`.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty duration")]
    Empty,

    #[error("unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("missing number before unit at position {0}")]
    MissingNumber(usize),

    #[error("missing unit after '{0}'")]
    MissingUnit(String),

    #[error("negative durations are not allowed")]
    Negative,

    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),

    #[error("duration is too large")]
    Overflow,

    #[error("'{0}' is not one of the offered choices")]
    NotOffered(String),
}

/// Failure of a single range query. Cloneable so it can live inside published snapshots.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("backend returned {status}: {message}")]
    Backend { status: String, message: String },

    #[error("unable to decode the response: {0}")]
    Decode(String),
}
