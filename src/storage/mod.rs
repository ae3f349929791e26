//! Pluggable upload providers.
//!
//! Every backend (local disk, S3, GCS, Cloudinary) implements [`UploadProvider`];
//! the [`StorageRegistry`] maps provider names to instances and picks the
//! default or a per-call override. An unconfigured provider is an error, never a
//! silent fallback to another backend.

pub mod cloudinary;
pub mod gcs;
pub mod hashing;
pub mod local;
pub mod registry;
pub mod retry;
pub mod s3;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use cloudinary::CloudinaryProvider;
pub use gcs::GcsProvider;
pub use local::LocalProvider;
pub use registry::{StorageRegistry, UploadLimits};
pub use s3::S3Provider;
pub use types::{UploadFile, UploadKind, UploadOptions, UploadResult, SHA256_METADATA_KEY};

pub const LOCAL_PROVIDER: &str = "local";
pub const S3_PROVIDER: &str = "aws-s3";
pub const GCS_PROVIDER: &str = "google-cloud-storage";
pub const CLOUDINARY_PROVIDER: &str = "cloudinary";

/// Names accepted as `storage.defaultProvider`
pub const KNOWN_PROVIDERS: [&str; 4] = [
    LOCAL_PROVIDER,
    S3_PROVIDER,
    GCS_PROVIDER,
    CLOUDINARY_PROVIDER,
];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage provider '{0}' not found")]
    ProviderNotFound(String),

    #[error("Storage provider '{0}' is not configured")]
    ProviderNotConfigured(String),

    #[error("Upload to {provider} failed: {reason}")]
    UploadFailed { provider: String, reason: String },

    #[error("Delete from {provider} failed: {reason}")]
    DeleteFailed { provider: String, reason: String },

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Invalid file URL: {0}")]
    InvalidUrl(String),

    #[error("Storage provider {provider} is unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn upload_failed(provider: &str, reason: impl ToString) -> Self {
        StorageError::UploadFailed {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn delete_failed(provider: &str, reason: impl ToString) -> Self {
        StorageError::DeleteFailed {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn unavailable(provider: &str, reason: impl ToString) -> Self {
        StorageError::Unavailable {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            StorageError::ProviderNotFound(_) => "PROVIDER_NOT_FOUND",
            StorageError::ProviderNotConfigured(_) => "PROVIDER_NOT_CONFIGURED",
            StorageError::UploadFailed { .. } => "UPLOAD_FAILED",
            StorageError::DeleteFailed { .. } => "DELETE_FAILED",
            StorageError::InvalidFile(_) => "INVALID_FILE",
            StorageError::InvalidUrl(_) => "INVALID_URL",
            StorageError::Unavailable { .. } => "PROVIDER_UNAVAILABLE",
            StorageError::Io(_) => "STORAGE_IO_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            StorageError::ProviderNotFound(_) => 400,
            StorageError::ProviderNotConfigured(_) => 503,
            StorageError::InvalidFile(_) | StorageError::InvalidUrl(_) => 400,
            StorageError::UploadFailed { .. } | StorageError::Unavailable { .. } => 502,
            StorageError::DeleteFailed { .. } | StorageError::Io(_) => 500,
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A storage backend for uploaded images.
#[async_trait]
pub trait UploadProvider: Send + Sync {
    /// Registry name, e.g. `aws-s3`
    fn name(&self) -> &str;

    /// Whether credentials and bucket/root are present
    fn is_configured(&self) -> bool;

    async fn upload_file(&self, file: &UploadFile, options: &UploadOptions)
        -> StorageResult<UploadResult>;

    /// Remove the object a previously returned URL points at
    async fn delete_file(&self, url: &str) -> StorageResult<()>;

    async fn file_exists(&self, url: &str) -> StorageResult<bool>;

    /// Public URL a file of this kind would be served at
    fn file_url(&self, filename: &str, kind: UploadKind) -> String;

    /// Whether `url` has the shape of a URL this provider hands out
    fn owns_url(&self, url: &str) -> bool;
}

/// Generated object name used by the remote providers: `<kind>-<uuid><ext>`
pub(crate) fn unique_object_name(file: &UploadFile, kind: UploadKind) -> String {
    format!("{}-{}{}", kind.as_str(), uuid::Uuid::new_v4(), file.extension())
}

/// Percent-encode every segment of an object key, keeping the slashes
pub(crate) fn encode_object_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn ensure_configured(provider: &dyn UploadProvider) -> StorageResult<()> {
    if provider.is_configured() {
        Ok(())
    } else {
        Err(StorageError::ProviderNotConfigured(provider.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_object_name() {
        let file = UploadFile::new("Label.PNG", "image/png", vec![1, 2, 3]);
        let name = unique_object_name(&file, UploadKind::Serial);
        assert!(name.starts_with("serial-"));
        assert!(name.ends_with(".png"));
        assert_ne!(name, unique_object_name(&file, UploadKind::Serial));
    }

    #[test]
    fn test_encode_object_path() {
        assert_eq!(
            encode_object_path("item-images/item-1.png"),
            "item-images/item-1.png"
        );
        assert_eq!(encode_object_path("dir/a b+ü.png"), "dir/a%20b%2B%C3%BC.png");
    }

    #[test]
    fn test_error_codes() {
        let err = StorageError::ProviderNotConfigured("cloudinary".to_string());
        assert_eq!(err.code(), "PROVIDER_NOT_CONFIGURED");
        assert_eq!(err.http_status(), 503);
        assert_eq!(
            err.to_string(),
            "Storage provider 'cloudinary' is not configured"
        );

        let err = StorageError::delete_failed("local", "file not found");
        assert_eq!(err.code(), "DELETE_FAILED");
        assert_eq!(err.to_string(), "Delete from local failed: file not found");

        let err = StorageError::unavailable("aws-s3", "status 503");
        assert_eq!(err.code(), "PROVIDER_UNAVAILABLE");
        assert_eq!(err.http_status(), 502);
    }
}
