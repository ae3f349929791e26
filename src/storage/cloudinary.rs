use super::hashing::sha256_hex;
use super::retry::{ensure_success, AttemptError, RetryStrategy};
use super::{
    ensure_configured, StorageError, StorageResult, UploadFile, UploadKind, UploadOptions,
    UploadProvider, UploadResult, CLOUDINARY_PROVIDER, SHA256_METADATA_KEY,
};
use crate::config::CloudinaryConfig;
use crate::logging::log_info;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

const DEFAULT_API_ENDPOINT: &str = "https://api.cloudinary.com";
const DELIVERY_HOST: &str = "https://res.cloudinary.com";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
    version: Option<u64>,
    format: Option<String>,
    etag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

/// `SHA-1(sorted "k=v&..." + secret)` as Cloudinary expects for signed calls
pub fn api_signature(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Public id of a delivery URL: the path after `/upload/`, minus the
/// version segment and the extension.
pub fn public_id_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let (_, after) = path.split_once("/upload/")?;

    let mut segments: Vec<&str> = after.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(first) = segments.first() {
        let is_version = first.len() > 1
            && first.starts_with('v')
            && first[1..].bytes().all(|b| b.is_ascii_digit());
        if is_version {
            segments.remove(0);
        }
    }

    let last = segments.pop()?;
    let stem = match last.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => last,
    };
    segments.push(stem);

    let public_id = segments.join("/");
    urlencoding::decode(&public_id).ok().map(|id| id.into_owned())
}

/// Cloudinary image hosting via the signed upload API.
pub struct CloudinaryProvider {
    config: CloudinaryConfig,
    client: reqwest::Client,
    retry: RetryStrategy,
}

impl CloudinaryProvider {
    pub fn new(config: CloudinaryConfig) -> Self {
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

    fn cloud_name(&self) -> &str {
        self.config.cloud_name.as_deref().unwrap_or_default()
    }

    fn api_key(&self) -> &str {
        self.config.api_key.as_deref().unwrap_or_default()
    }

    fn api_secret(&self) -> &str {
        self.config.api_secret.as_deref().unwrap_or_default()
    }

    fn api_url(&self, action: &str) -> String {
        format!(
            "{}/v1_1/{}/image/{}",
            self.config
                .endpoint
                .as_deref()
                .unwrap_or(DEFAULT_API_ENDPOINT)
                .trim_end_matches('/'),
            self.cloud_name(),
            action
        )
    }

    fn signed_params(&self, mut params: BTreeMap<&'static str, String>) -> BTreeMap<&'static str, String> {
        params.insert("timestamp", Utc::now().timestamp().to_string());
        let signature = api_signature(&params, self.api_secret());
        params.insert("signature", signature);
        params.insert("api_key", self.api_key().to_string());
        params
    }

    async fn destroy(&self, public_id: &str) -> Result<DestroyResponse, AttemptError> {
        let mut params = BTreeMap::new();
        params.insert("public_id", public_id.to_string());
        let params = self.signed_params(params);

        let response = self
            .client
            .post(self.api_url("destroy"))
            .form(&params)
            .send()
            .await
            .map_err(AttemptError::network)?;
        let response = ensure_success(response).await?;
        response
            .json::<DestroyResponse>()
            .await
            .map_err(|e| AttemptError::client(format!("Invalid destroy response: {}", e)))
    }
}

#[async_trait]
impl UploadProvider for CloudinaryProvider {
    fn name(&self) -> &str {
        CLOUDINARY_PROVIDER
    }

    fn is_configured(&self) -> bool {
        [
            &self.config.cloud_name,
            &self.config.api_key,
            &self.config.api_secret,
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
        let public_name = format!("{}-{}", options.kind.as_str(), uuid::Uuid::new_v4());
        let file_ref = file;
        let (folder_ref, name_ref) = (&folder, &public_name);

        let uploaded = self
            .retry
            .run(&format!("Cloudinary upload {}", public_name), move || async move {
                let mut params = BTreeMap::new();
                params.insert("folder", folder_ref.clone());
                params.insert("public_id", name_ref.clone());
                let params = self.signed_params(params);

                let part = Part::bytes(file_ref.bytes.clone())
                    .file_name(file_ref.original_name.clone())
                    .mime_str(&file_ref.content_type)
                    .map_err(|e| AttemptError::client(e.to_string()))?;
                let mut form = Form::new().part("file", part);
                for (key, value) in params {
                    form = form.text(key, value);
                }

                let response = self
                    .client
                    .post(self.api_url("upload"))
                    .multipart(form)
                    .send()
                    .await
                    .map_err(AttemptError::network)?;
                let response = ensure_success(response).await?;
                response
                    .json::<UploadResponse>()
                    .await
                    .map_err(|e| AttemptError::client(format!("Invalid upload response: {}", e)))
            })
            .await
            .map_err(|e| StorageError::upload_failed(CLOUDINARY_PROVIDER, e.message))?;

        log_info(
            "storage",
            &format!("Uploaded cloudinary:{} ({} bytes)", uploaded.public_id, file.size()),
        )
        .unwrap_or_default();

        let filename = match &uploaded.format {
            Some(format) => format!("{}.{}", public_name, format),
            None => public_name.clone(),
        };

        let mut metadata = options.metadata.clone();
        metadata.insert(SHA256_METADATA_KEY.to_string(), sha256_hex(&file.bytes));
        metadata.insert("public_id".to_string(), uploaded.public_id);
        if let Some(version) = uploaded.version {
            metadata.insert("version".to_string(), version.to_string());
        }
        if let Some(etag) = uploaded.etag {
            metadata.insert("etag".to_string(), etag);
        }

        Ok(UploadResult {
            filename,
            original_name: file.original_name.clone(),
            mimetype: file.content_type.clone(),
            size: file.size(),
            url: uploaded.secure_url,
            path: None,
            uploaded_at: Utc::now(),
            provider: CLOUDINARY_PROVIDER.to_string(),
            metadata,
        })
    }

    async fn delete_file(&self, url: &str) -> StorageResult<()> {
        ensure_configured(self)?;
        let public_id =
            public_id_from_url(url).ok_or_else(|| StorageError::InvalidUrl(url.to_string()))?;
        let id_ref = &public_id;

        let response = self
            .retry
            .run(&format!("Cloudinary destroy {}", public_id), move || async move {
                self.destroy(id_ref).await
            })
            .await
            .map_err(|e| StorageError::delete_failed(CLOUDINARY_PROVIDER, e.message))?;

        if response.result != "ok" {
            return Err(StorageError::delete_failed(
                CLOUDINARY_PROVIDER,
                format!("{}: {}", public_id, response.result),
            ));
        }

        log_info("storage", &format!("Deleted cloudinary:{}", public_id)).unwrap_or_default();
        Ok(())
    }

    async fn file_exists(&self, url: &str) -> StorageResult<bool> {
        ensure_configured(self)?;
        if public_id_from_url(url).is_none() {
            return Err(StorageError::InvalidUrl(url.to_string()));
        }

        self.retry
            .run("Cloudinary HEAD", move || async move {
                let response = self
                    .client
                    .head(url)
                    .send()
                    .await
                    .map_err(AttemptError::network)?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(false);
                }
                ensure_success(response).await.map(|_| true)
            })
            .await
            .map_err(|e| StorageError::unavailable(CLOUDINARY_PROVIDER, e.message))
    }

    fn file_url(&self, filename: &str, kind: UploadKind) -> String {
        format!(
            "{}/{}/image/upload/{}/{}",
            DELIVERY_HOST,
            self.cloud_name(),
            kind.default_folder(),
            filename
        )
    }

    fn owns_url(&self, url: &str) -> bool {
        let delivery_prefix = format!("{}/{}/", DELIVERY_HOST, self.cloud_name());
        self.is_configured()
            && url.starts_with(&delivery_prefix)
            && public_id_from_url(url).is_some()
    }
}
