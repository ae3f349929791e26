use super::hashing::{md5_base64, sha256_hex};
use super::retry::{ensure_success, AttemptError, RetryStrategy};
use super::{
    encode_object_path, ensure_configured, unique_object_name, StorageError, StorageResult,
    UploadFile, UploadKind, UploadOptions, UploadProvider, UploadResult, GCS_PROVIDER,
    SHA256_METADATA_KEY,
};
use crate::config::GcsConfig;
use crate::logging::{log_info, log_warn};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Object resource returned by the JSON API
#[derive(Debug, Deserialize)]
struct GcsObject {
    name: String,
    #[serde(rename = "md5Hash")]
    md5_hash: Option<String>,
    generation: Option<String>,
}

/// Google Cloud Storage via the JSON API, authenticated with an OAuth bearer token.
pub struct GcsProvider {
    config: GcsConfig,
    client: reqwest::Client,
    retry: RetryStrategy,
}

impl GcsProvider {
    pub fn new(config: GcsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            retry: RetryStrategy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> &str {
        self.config
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/')
    }

    fn bucket(&self) -> &str {
        self.config.bucket.as_deref().unwrap_or_default()
    }

    fn token(&self) -> &str {
        self.config.access_token.as_deref().unwrap_or_default()
    }

    fn public_base_url(&self) -> String {
        format!("{}/{}", self.endpoint(), self.bucket())
    }

    pub fn public_url(&self, object: &str) -> String {
        format!("{}/{}", self.public_base_url(), encode_object_path(object))
    }

    pub fn object_from_url(&self, url: &str) -> StorageResult<String> {
        let base = self.public_base_url();
        let encoded = url
            .strip_prefix(&base)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|object| !object.is_empty())
            .ok_or_else(|| StorageError::InvalidUrl(url.to_string()))?;

        urlencoding::decode(encoded)
            .map(|object| object.into_owned())
            .map_err(|_| StorageError::InvalidUrl(url.to_string()))
    }

    fn metadata_url(&self, object: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint(),
            self.bucket(),
            urlencoding::encode(object)
        )
    }

    fn upload_url(&self, object: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.endpoint(),
            self.bucket(),
            urlencoding::encode(object)
        )
    }

    async fn get_metadata(&self, object: &str) -> Result<Option<GcsObject>, AttemptError> {
        let response = self
            .client
            .get(self.metadata_url(object))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(AttemptError::network)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response).await?;
        response
            .json::<GcsObject>()
            .await
            .map(Some)
            .map_err(|e| AttemptError::client(format!("Invalid object metadata: {}", e)))
    }
}

#[async_trait]
impl UploadProvider for GcsProvider {
    fn name(&self) -> &str {
        GCS_PROVIDER
    }

    fn is_configured(&self) -> bool {
        [
            &self.config.bucket,
            &self.config.project_id,
            &self.config.access_token,
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
        let object = if folder.is_empty() {
            filename.clone()
        } else {
            format!("{}/{}", folder, filename)
        };
        let upload_url = self.upload_url(&object);
        let (url_ref, file_ref) = (&upload_url, file);

        let stored = self
            .retry
            .run(&format!("GCS upload {}", object), move || async move {
                let response = self
                    .client
                    .post(url_ref.as_str())
                    .bearer_auth(self.token())
                    .header("Content-Type", file_ref.content_type.as_str())
                    .body(file_ref.bytes.clone())
                    .send()
                    .await
                    .map_err(AttemptError::network)?;
                let response = ensure_success(response).await?;
                response
                    .json::<GcsObject>()
                    .await
                    .map_err(|e| AttemptError::client(format!("Invalid upload response: {}", e)))
            })
            .await
            .map_err(|e| StorageError::upload_failed(GCS_PROVIDER, e.message))?;

        let expected_md5 = md5_base64(&file.bytes);
        if let Some(md5) = &stored.md5_hash {
            if md5 != &expected_md5 {
                log_warn(
                    "storage",
                    &format!("GCS checksum mismatch for {}: {} != {}", object, md5, expected_md5),
                )
                .unwrap_or_default();
                return Err(StorageError::upload_failed(
                    GCS_PROVIDER,
                    "checksum mismatch after upload",
                ));
            }
        }

        log_info(
            "storage",
            &format!("Uploaded gs://{}/{} ({} bytes)", self.bucket(), stored.name, file.size()),
        )
        .unwrap_or_default();

        let mut metadata = options.metadata.clone();
        metadata.insert(SHA256_METADATA_KEY.to_string(), sha256_hex(&file.bytes));
        metadata.insert("bucket".to_string(), self.bucket().to_string());
        metadata.insert("object".to_string(), object.clone());
        if let Some(generation) = stored.generation {
            metadata.insert("generation".to_string(), generation);
        }

        Ok(UploadResult {
            url: self.public_url(&object),
            filename,
            original_name: file.original_name.clone(),
            mimetype: file.content_type.clone(),
            size: file.size(),
            path: None,
            uploaded_at: Utc::now(),
            provider: GCS_PROVIDER.to_string(),
            metadata,
        })
    }

    async fn delete_file(&self, url: &str) -> StorageResult<()> {
        ensure_configured(self)?;
        let object = self.object_from_url(url)?;
        let delete_url = self.metadata_url(&object);
        let url_ref = &delete_url;

        let found = self
            .retry
            .run(&format!("GCS delete {}", object), move || async move {
                let response = self
                    .client
                    .delete(url_ref.as_str())
                    .bearer_auth(self.token())
                    .send()
                    .await
                    .map_err(AttemptError::network)?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(false);
                }
                ensure_success(response).await.map(|_| true)
            })
            .await
            .map_err(|e| StorageError::delete_failed(GCS_PROVIDER, e.message))?;

        if !found {
            return Err(StorageError::delete_failed(
                GCS_PROVIDER,
                format!("object not found: {}", object),
            ));
        }

        log_info("storage", &format!("Deleted gs://{}/{}", self.bucket(), object))
            .unwrap_or_default();
        Ok(())
    }

    async fn file_exists(&self, url: &str) -> StorageResult<bool> {
        ensure_configured(self)?;
        let object = self.object_from_url(url)?;
        let object_ref = &object;

        self.retry
            .run(&format!("GCS metadata {}", object), move || async move {
                self.get_metadata(object_ref).await.map(|meta| meta.is_some())
            })
            .await
            .map_err(|e| StorageError::unavailable(GCS_PROVIDER, e.message))
    }

    fn file_url(&self, filename: &str, kind: UploadKind) -> String {
        self.public_url(&format!("{}/{}", kind.default_folder(), filename))
    }

    fn owns_url(&self, url: &str) -> bool {
        self.is_configured() && self.object_from_url(url).is_ok()
    }
}
