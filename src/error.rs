use thiserror::Error;

use crate::auth::AuthError;
use crate::ocr::OcrError;
use crate::storage::StorageError;

/// Parcel intake service errors
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage provider errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// OCR errors
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Validation errors (missing fields, bad identifiers, etc.)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Mutex poison error
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = IntakeError> = std::result::Result<T, E>;

impl IntakeError {
    /// HTTP status used when this error reaches a client
    pub fn http_status(&self) -> u16 {
        match self {
            IntakeError::Auth(e) => e.http_status(),
            IntakeError::Storage(e) => e.http_status(),
            IntakeError::Validation(_) => 400,
            IntakeError::NotFound(_) => 404,
            _ => 500,
        }
    }

    /// Machine-readable code for JSON error bodies
    pub fn code(&self) -> &'static str {
        match self {
            IntakeError::Auth(e) => e.code().as_str(),
            IntakeError::Storage(e) => e.code(),
            IntakeError::Ocr(_) => "OCR_ERROR",
            IntakeError::Validation(_) => "VALIDATION_ERROR",
            IntakeError::NotFound(_) => "NOT_FOUND",
            IntakeError::Config(_) => "CONFIG_ERROR",
            _ => "SERVER_ERROR",
        }
    }
}

impl From<Box<dyn std::error::Error>> for IntakeError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        IntakeError::Other(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for IntakeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        IntakeError::LockPoisoned(err.to_string())
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T, IntakeError>;
}

impl<T, E: Into<IntakeError>> ErrorContext<T> for Result<T, E> {
    fn context(self, msg: &str) -> Result<T, IntakeError> {
        self.map_err(|e| {
            let err: IntakeError = e.into();
            match err {
                IntakeError::Other(s) => IntakeError::Other(format!("{}: {}", msg, s)),
                IntakeError::Config(s) => IntakeError::Config(format!("{}: {}", msg, s)),
                IntakeError::Validation(s) => IntakeError::Validation(format!("{}: {}", msg, s)),
                IntakeError::NotFound(s) => IntakeError::NotFound(format!("{}: {}", msg, s)),
                IntakeError::LockPoisoned(s) => {
                    IntakeError::LockPoisoned(format!("{}: {}", msg, s))
                }
                // Typed sources keep their own message
                other => other,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IntakeError::Validation("Missing tracking barcode".to_string());
        assert_eq!(err.to_string(), "Validation error: Missing tracking barcode");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_storage_error_status() {
        let err: IntakeError = StorageError::ProviderNotConfigured("aws-s3".to_string()).into();
        assert_eq!(err.code(), "PROVIDER_NOT_CONFIGURED");
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn test_error_context() {
        let result: Result<(), IntakeError> = Err(IntakeError::Config("no port".to_string()));
        let err = result.context("Failed to load config").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Failed to load config: no port"
        );

        let io: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        let err_msg = io.context("Failed to read config file").unwrap_err().to_string();
        assert!(err_msg.contains("I/O error"));
    }
}
