//! Retry logic with exponential backoff and error classification for remote providers.

use std::future::Future;
use std::time::Duration;

use crate::logging::log_warn;

/// Error classification for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Client errors (400-499) - invalid input, don't retry
    Client,
    /// Server errors (500-599) - temporary issues, retry with backoff
    Server,
    /// Network errors - connection issues, retry with backoff
    Network,
}

/// A failed attempt at a remote call
#[derive(Debug, Clone)]
pub struct AttemptError {
    pub error_type: ErrorType,
    pub message: String,
}

impl AttemptError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        Self::with_status(status.as_u16(), format!("status {}: {}", status, body.trim()))
    }

    /// Classified by an HTTP status code that came from another client
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            error_type: classify_status(status),
            message: message.into(),
        }
    }

    pub fn network(err: reqwest::Error) -> Self {
        Self::transient(err.to_string())
    }

    /// Connection-level failure with no response
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Network,
            message: message.into(),
        }
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Client,
            message: message.into(),
        }
    }
}

/// Turn a non-2xx response into a classified attempt error
pub async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, AttemptError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response.text().await.unwrap_or_default();
    Err(AttemptError::from_status(status, &error_text))
}

pub fn classify_status(status: u16) -> ErrorType {
    match status {
        400..=499 => ErrorType::Client,
        500..=599 => ErrorType::Server,
        _ => ErrorType::Network,
    }
}

/// Retry strategy configuration
#[derive(Debug, Clone, Copy)]
pub struct RetryStrategy {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryStrategy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn should_retry(&self, retry_count: u32, error_type: ErrorType) -> bool {
        // Never retry client errors
        if error_type == ErrorType::Client {
            return false;
        }
        retry_count < self.max_retries
    }

    /// base * 2^retry_count
    pub fn calculate_backoff(&self, retry_count: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry_count))
    }

    /// Run `op` until it succeeds, fails with a client error, or retries run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, AttemptError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut retry_count = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(retry_count, err.error_type) => {
                    let delay = self.calculate_backoff(retry_count);
                    log_warn(
                        "storage",
                        &format!(
                            "{} failed ({:?}: {}), retrying in {:?}",
                            label, err.error_type, err.message, delay
                        ),
                    )
                    .unwrap_or_default();
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
