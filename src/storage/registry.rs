use super::{
    CloudinaryProvider, GcsProvider, LocalProvider, S3Provider, StorageError, StorageResult,
    UploadFile, UploadKind, UploadOptions, UploadProvider, UploadResult,
};
use crate::config::{StorageConfig, UploadsConfig};
use crate::logging::{log_info, log_warn};
use crate::validation::validate_upload;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-file limits checked before any provider is called
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_file_size: u64,
    pub allowed_mime_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self::from(&UploadsConfig::default())
    }
}

impl From<&UploadsConfig> for UploadLimits {
    fn from(config: &UploadsConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            allowed_mime_types: config.allowed_mime_types.clone(),
        }
    }
}

impl UploadLimits {
    pub fn check(&self, file: &UploadFile) -> StorageResult<()> {
        validate_upload(
            &file.content_type,
            file.size(),
            self.max_file_size,
            &self.allowed_mime_types,
        )
        .map_err(|e| StorageError::InvalidFile(format!("{}: {}", file.original_name, e)))
    }
}

/// Named upload providers plus the default used when a call names none.
pub struct StorageRegistry {
    providers: BTreeMap<String, Arc<dyn UploadProvider>>,
    default_provider: String,
    limits: UploadLimits,
}

impl StorageRegistry {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: BTreeMap::new(),
            default_provider: default_provider.into(),
            limits: UploadLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Register all built-in providers and select the configured default.
    pub fn from_config(config: &StorageConfig, limits: UploadLimits) -> Self {
        let mut registry = Self::new(config.default_provider.clone()).with_limits(limits);
        registry.register(Arc::new(LocalProvider::from_config(&config.local)));
        registry.register(Arc::new(S3Provider::new(config.s3.clone())));
        registry.register(Arc::new(GcsProvider::new(config.gcs.clone())));
        registry.register(Arc::new(CloudinaryProvider::new(config.cloudinary.clone())));

        if !registry.is_provider_configured(&config.default_provider) {
            log_warn(
                "storage",
                &format!(
                    "Default storage provider '{}' is not configured; uploads through it will fail",
                    config.default_provider
                ),
            )
            .unwrap_or_default();
        } else {
            log_info(
                "storage",
                &format!("Using '{}' as default storage provider", config.default_provider),
            )
            .unwrap_or_default();
        }

        registry
    }

    /// Add or replace a provider under its own name
    pub fn register(&mut self, provider: Arc<dyn UploadProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn UploadProvider>> {
        self.providers.remove(name)
    }

    pub fn set_default(&mut self, name: &str) -> StorageResult<()> {
        if !self.providers.contains_key(name) {
            return Err(StorageError::ProviderNotFound(name.to_string()));
        }
        self.default_provider = name.to_string();
        Ok(())
    }

    pub fn default_provider_name(&self) -> &str {
        &self.default_provider
    }

    pub fn default_provider(&self) -> StorageResult<Arc<dyn UploadProvider>> {
        self.provider(&self.default_provider)
    }

    pub fn provider(&self, name: &str) -> StorageResult<Arc<dyn UploadProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::ProviderNotFound(name.to_string()))
    }

    pub fn available_providers(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn configured_providers(&self) -> Vec<String> {
        self.providers
            .values()
            .filter(|p| p.is_configured())
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn is_provider_configured(&self, name: &str) -> bool {
        self.providers
            .get(name)
            .is_some_and(|provider| provider.is_configured())
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Provider named by `requested`, else the default; must be configured.
    fn resolve(&self, requested: Option<&str>) -> StorageResult<Arc<dyn UploadProvider>> {
        let name = requested.unwrap_or(&self.default_provider);
        let provider = self.provider(name)?;
        if !provider.is_configured() {
            return Err(StorageError::ProviderNotConfigured(name.to_string()));
        }
        Ok(provider)
    }

    pub async fn upload(
        &self,
        file: &UploadFile,
        options: &UploadOptions,
    ) -> StorageResult<UploadResult> {
        let provider = self.resolve(options.provider.as_deref())?;
        self.limits.check(file)?;
        provider.upload_file(file, options).await
    }

    /// Upload in order; the first failure aborts and already uploaded files are returned
    /// alongside the error so callers can clean them up.
    pub async fn upload_many(
        &self,
        files: &[UploadFile],
        options: &UploadOptions,
    ) -> Result<Vec<UploadResult>, (Vec<UploadResult>, StorageError)> {
        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            match self.upload(file, options).await {
                Ok(result) => uploaded.push(result),
                Err(e) => return Err((uploaded, e)),
            }
        }
        Ok(uploaded)
    }

    /// Provider for an existing URL: the named one, else the configured provider
    /// that issued the URL, else the default.
    fn resolve_for_url(
        &self,
        url: &str,
        provider: Option<&str>,
    ) -> StorageResult<Arc<dyn UploadProvider>> {
        if provider.is_none() {
            if let Some(owner) = self
                .providers
                .values()
                .find(|p| p.is_configured() && p.owns_url(url))
            {
                return Ok(owner.clone());
            }
        }
        self.resolve(provider)
    }

    pub async fn delete(&self, url: &str, provider: Option<&str>) -> StorageResult<()> {
        self.resolve_for_url(url, provider)?.delete_file(url).await
    }

    /// Delete every URL, returning the failures
    pub async fn delete_many(
        &self,
        urls: &[String],
        provider: Option<&str>,
    ) -> Vec<(String, StorageError)> {
        let mut failures = Vec::new();
        for url in urls {
            if let Err(e) = self.delete(url, provider).await {
                failures.push((url.clone(), e));
            }
        }
        failures
    }

    pub async fn file_exists(&self, url: &str, provider: Option<&str>) -> StorageResult<bool> {
        self.resolve_for_url(url, provider)?.file_exists(url).await
    }

    pub fn file_url(
        &self,
        filename: &str,
        kind: UploadKind,
        provider: Option<&str>,
    ) -> StorageResult<String> {
        let name = provider.unwrap_or(&self.default_provider);
        Ok(self.provider(name)?.file_url(filename, kind))
    }
}
