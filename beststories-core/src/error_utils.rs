use crate::error::*;
use std::time::Duration;
use tracing::{error, info};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::HackerNewsApi(e) => {
                error!("Hacker News API error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            CoreError::UpstreamUnavailable(cause) => {
                error!("Upstream failure cause: {:?}", cause);
            }
            _ => {}
        }
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::HackerNewsApi(e) => e.is_retryable(),
            CoreError::UpstreamUnavailable(cause) => cause.is_retryable(),
            CoreError::Network(_) => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::HackerNewsApi(e) => e.retry_after(),
            CoreError::UpstreamUnavailable(cause) => cause.retry_after(),
            _ if self.is_retryable() => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::HackerNewsApi(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::UpstreamUnavailable(_) => {
                "Hacker News is currently unreachable. Please try again shortly.".to_string()
            }
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::InvalidInput { message } => message.clone(),
            CoreError::NotFound { resource } => format!("No {} found.", resource),
            CoreError::Cancelled => "The request was cancelled.".to_string(),
            _ => "An unexpected error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::HackerNewsApi(_) => "HACKER_NEWS_API".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::NotFound { .. } => "NOT_FOUND".to_string(),
            CoreError::Cancelled => "CANCELLED".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl ErrorExt for HackerNewsApiError {
    fn log_error(&self) -> &Self {
        error!("HackerNewsApiError: {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            HackerNewsApiError::RateLimitExceeded { .. } => true,
            HackerNewsApiError::RequestTimeout => true,
            HackerNewsApiError::ServerError { status_code } => *status_code >= 500,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            HackerNewsApiError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ if self.is_retryable() => Some(Duration::from_secs(10)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            HackerNewsApiError::RateLimitExceeded { retry_after } => format!(
                "Too many requests. Please wait {} seconds before trying again.",
                retry_after
            ),
            HackerNewsApiError::RequestTimeout => {
                "Request to Hacker News timed out. Please try again.".to_string()
            }
            HackerNewsApiError::InvalidResponse { .. } => {
                "Hacker News returned data that could not be understood.".to_string()
            }
            _ => "Hacker News API error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            HackerNewsApiError::RequestTimeout => "HN_TIMEOUT".to_string(),
            HackerNewsApiError::RateLimitExceeded { .. } => "HN_RATE_LIMIT".to_string(),
            HackerNewsApiError::ServerError { .. } => "HN_SERVER_ERROR".to_string(),
            HackerNewsApiError::UnexpectedStatus { .. } => "HN_UNEXPECTED_STATUS".to_string(),
            HackerNewsApiError::InvalidResponse { .. } => "HN_INVALID_RESPONSE".to_string(),
            HackerNewsApiError::InvalidEndpoint { .. } => "HN_INVALID_ENDPOINT".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!("ConfigError: {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { path } => {
                format!("Configuration file '{}' not found.", path)
            }
            ConfigError::InvalidValue { field, .. } => {
                format!("Invalid value for configuration field '{}'.", field)
            }
            ConfigError::ValidationFailed { reason } => {
                format!("Configuration is invalid: {}.", reason)
            }
            ConfigError::Parse(_) => {
                "Configuration file format is invalid. Please check the settings.".to_string()
            }
        }
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED".to_string(),
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR".to_string(),
        }
    }
}

/// Logs a failure with its code and retry hint and produces the message
/// shown to the user.
#[derive(Debug, Default)]
pub struct ErrorReporter;

impl ErrorReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn report_error(&self, error: &CoreError) -> String {
        error.log_error();
        info!("Error code: {}", error.error_code());
        if error.is_retryable() {
            if let Some(retry_after) = error.retry_after() {
                info!("Error is retryable. Retry after: {:?}", retry_after);
            }
        }
        let message = error.user_friendly_message();
        info!("User message: {}", message);
        message
    }
}
