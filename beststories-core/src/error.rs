use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Hacker News API error: {0}")]
    HackerNewsApi(#[from] HackerNewsApiError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The ranked id list could not be retrieved. The cause is shared with
    /// every caller that was waiting on the same upstream fetch.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(#[source] Arc<CoreError>),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone)]
pub enum HackerNewsApiError {
    #[error("Request timeout")]
    RequestTimeout,

    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },

    #[error("Unexpected status {status_code} from {endpoint}")]
    UnexpectedStatus { status_code: u16, endpoint: String },

    #[error("Invalid API response: {details}")]
    InvalidResponse { details: String },

    #[error("Invalid endpoint: {endpoint}")]
    InvalidEndpoint { endpoint: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
