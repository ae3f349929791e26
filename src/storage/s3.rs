use super::hashing::{md5_base64, sha256_hex};
use super::retry::{AttemptError, RetryStrategy};
use super::{
    encode_object_path, ensure_configured, unique_object_name, StorageError, StorageResult,
    UploadFile, UploadKind, UploadOptions, UploadProvider, UploadResult, S3_PROVIDER,
    SHA256_METADATA_KEY,
};
use crate::config::S3Config;
use crate::logging::log_info;
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region, RequestChecksumCalculation};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::Utc;

/// Amazon S3 (or an S3-compatible endpoint such as MinIO) through the AWS SDK.
pub struct S3Provider {
    config: S3Config,
    client: Client,
    retry: RetryStrategy,
}

/// SDK client for the configured region and static keys
fn build_client(config: &S3Config) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone().unwrap_or_default(),
        config.secret_access_key.clone().unwrap_or_default(),
        None,
        None,
        "parcel-intake",
    );

    let mut builder = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials)
        .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
        // Retries go through RetryStrategy
        .retry_config(RetryConfig::disabled());

    if let Some(endpoint) = &config.endpoint {
        builder = builder
            .endpoint_url(endpoint.trim_end_matches('/'))
            .force_path_style(true);
    }

    Client::from_conf(builder.build())
}

/// Classify an SDK failure by the HTTP status it came back with, if any
fn attempt_error<E>(err: SdkError<E, HttpResponse>) -> AttemptError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    let message = DisplayErrorContext(&err).to_string();
    match (status, &err) {
        (Some(status), _) => AttemptError::with_status(status, message),
        (None, SdkError::ConstructionFailure(_)) => AttemptError::client(message),
        (None, _) => AttemptError::transient(message),
    }
}

fn is_not_found<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response()
        .is_some_and(|response| response.status().as_u16() == 404)
}

impl S3Provider {
    pub fn new(config: S3Config) -> Self {
        Self {
            client: build_client(&config),
            config,
            retry: RetryStrategy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    fn bucket(&self) -> &str {
        self.config.bucket.as_deref().unwrap_or_default()
    }

    /// URL prefix every object URL of this bucket starts with
    fn bucket_base_url(&self) -> String {
        match &self.config.endpoint {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket()),
            None => format!(
                "https://{}.s3.{}.amazonaws.com",
                self.bucket(),
                self.config.region
            ),
        }
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_base_url(), encode_object_path(key))
    }

    /// Object key of a URL previously returned by this provider
    pub fn key_from_url(&self, url: &str) -> StorageResult<String> {
        let base = self.bucket_base_url();
        let encoded = url
            .strip_prefix(&base)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| !key.is_empty())
            .ok_or_else(|| StorageError::InvalidUrl(url.to_string()))?;

        urlencoding::decode(encoded)
            .map(|key| key.into_owned())
            .map_err(|_| StorageError::InvalidUrl(url.to_string()))
    }

    async fn head(&self, key: &str) -> Result<bool, AttemptError> {
        match self
            .client
            .head_object()
            .bucket(self.bucket())
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(attempt_error(err)),
        }
    }

    async fn head_with_retry(&self, key: &str) -> Result<bool, AttemptError> {
        self.retry
            .run(&format!("S3 HEAD {}", key), move || async move {
                self.head(key).await
            })
            .await
    }
}

#[async_trait]
impl UploadProvider for S3Provider {
    fn name(&self) -> &str {
        S3_PROVIDER
    }

    fn is_configured(&self) -> bool {
        [
            &self.config.bucket,
            &self.config.access_key_id,
            &self.config.secret_access_key,
        ]
        .iter()
        .all(|value| value.as_deref().is_some_and(|v| !v.is_empty()))
    }

    async fn upload_file(
        &self,
        file: &UploadFile,
        options: &UploadOptions,
    ) -> StorageResult<UploadResult> {
        ensure_configured(self)?;

        let folder = options.resolved_folder();
        let filename = unique_object_name(file, options.kind);
        let key = if folder.is_empty() {
            filename.clone()
        } else {
            format!("{}/{}", folder, filename)
        };
        let url = self.object_url(&key);
        let sha256 = sha256_hex(&file.bytes);
        let content_md5 = md5_base64(&file.bytes);
        let original_name = urlencoding::encode(&file.original_name).into_owned();

        let (key_ref, file_ref) = (&key, file);
        let (md5_ref, sha_ref, name_ref) = (&content_md5, &sha256, &original_name);
        self.retry
            .run(&format!("S3 PUT {}", key), move || async move {
                self.client
                    .put_object()
                    .bucket(self.bucket())
                    .key(key_ref.as_str())
                    .body(ByteStream::from(file_ref.bytes.clone()))
                    .content_type(file_ref.content_type.as_str())
                    .content_md5(md5_ref.as_str())
                    .metadata("original-name", name_ref.as_str())
                    .metadata("sha256", sha_ref.as_str())
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(attempt_error)
            })
            .await
            .map_err(|e| StorageError::upload_failed(S3_PROVIDER, e.message))?;

        log_info(
            "storage",
            &format!("Uploaded s3://{}/{} ({} bytes)", self.bucket(), key, file.size()),
        )
        .unwrap_or_default();

        let mut metadata = options.metadata.clone();
        metadata.insert(SHA256_METADATA_KEY.to_string(), sha256);
        metadata.insert("bucket".to_string(), self.bucket().to_string());
        metadata.insert("key".to_string(), key);

        Ok(UploadResult {
            filename,
            original_name: file.original_name.clone(),
            mimetype: file.content_type.clone(),
            size: file.size(),
            url,
            path: None,
            uploaded_at: Utc::now(),
            provider: S3_PROVIDER.to_string(),
            metadata,
        })
    }

    async fn delete_file(&self, url: &str) -> StorageResult<()> {
        ensure_configured(self)?;
        let key = self.key_from_url(url)?;

        // S3 answers 204 for missing keys, so check first
        let exists = self
            .head_with_retry(&key)
            .await
            .map_err(|e| StorageError::delete_failed(S3_PROVIDER, e.message))?;
        if !exists {
            return Err(StorageError::delete_failed(
                S3_PROVIDER,
                format!("object not found: {}", key),
            ));
        }

        let key_ref = &key;
        self.retry
            .run(&format!("S3 DELETE {}", key), move || async move {
                self.client
                    .delete_object()
                    .bucket(self.bucket())
                    .key(key_ref.as_str())
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(attempt_error)
            })
            .await
            .map_err(|e| StorageError::delete_failed(S3_PROVIDER, e.message))?;

        log_info("storage", &format!("Deleted s3://{}/{}", self.bucket(), key))
            .unwrap_or_default();
        Ok(())
    }

    async fn file_exists(&self, url: &str) -> StorageResult<bool> {
        ensure_configured(self)?;
        let key = self.key_from_url(url)?;
        self.head_with_retry(&key)
            .await
            .map_err(|e| StorageError::unavailable(S3_PROVIDER, e.message))
    }

    fn file_url(&self, filename: &str, kind: UploadKind) -> String {
        self.object_url(&format!("{}/{}", kind.default_folder(), filename))
    }

    fn owns_url(&self, url: &str) -> bool {
        self.is_configured() && self.key_from_url(url).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> S3Config {
        S3Config {
            bucket: Some("parcel-images".to_string()),
            region: "ap-southeast-1".to_string(),
            access_key_id: Some("AKIAEXAMPLE".to_string()),
            secret_access_key: Some("secret".to_string()),
            endpoint: None,
        }
    }

    #[tokio::test]
    async fn test_is_configured() {
        assert!(S3Provider::new(configured()).is_configured());
        assert!(!S3Provider::new(S3Config::default()).is_configured());

        let mut no_secret = configured();
        no_secret.secret_access_key = Some(String::new());
        assert!(!S3Provider::new(no_secret).is_configured());
    }

    #[tokio::test]
    async fn test_object_url_contains_bucket() {
        let provider = S3Provider::new(configured());
        assert_eq!(
            provider.file_url("serial-1.png", UploadKind::Serial),
            "https://parcel-images.s3.ap-southeast-1.amazonaws.com/serial-numbers/serial-1.png"
        );
    }

    #[tokio::test]
    async fn test_path_style_endpoint() {
        let mut config = configured();
        config.endpoint = Some("http://localhost:9000/".to_string());
        let provider = S3Provider::new(config);

        let url = provider.object_url("item-images/item 1.png");
        assert_eq!(url, "http://localhost:9000/parcel-images/item-images/item%201.png");
        assert_eq!(provider.key_from_url(&url).unwrap(), "item-images/item 1.png");
    }

    #[tokio::test]
    async fn test_key_from_foreign_url() {
        let provider = S3Provider::new(configured());
        let err = provider
            .key_from_url("https://other.s3.ap-southeast-1.amazonaws.com/a.png")
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_upload_unconfigured() {
        let provider = S3Provider::new(S3Config::default());
        let file = UploadFile::new("a.png", "image/png", vec![1]);
        let err = provider
            .upload_file(&file, &UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ProviderNotConfigured(name) if name == "aws-s3"));
    }
}
