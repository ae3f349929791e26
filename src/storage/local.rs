use super::hashing::sha256_hex;
use super::{
    unique_object_name, StorageError, StorageResult, UploadFile, UploadKind, UploadOptions,
    UploadProvider, UploadResult, LOCAL_PROVIDER, SHA256_METADATA_KEY,
};
use crate::config::LocalStorageConfig;
use crate::logging::log_info;
use crate::validation::validate_relative_path;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Stores uploads on the local filesystem under `root`, served at `base_url`.
pub struct LocalProvider {
    root: PathBuf,
    base_url: String,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &LocalStorageConfig) -> Self {
        Self::new(config.root.clone(), config.base_url.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a URL produced by this provider back to a path under `root`
    pub fn path_for_url(&self, url: &str) -> StorageResult<PathBuf> {
        let relative = url
            .strip_prefix(&self.base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| StorageError::InvalidUrl(url.to_string()))?;

        // Drop any query string or fragment a CDN may have appended
        let relative = relative
            .split(['?', '#'])
            .next()
            .unwrap_or_default();

        let decoded = urlencoding::decode(relative)
            .map_err(|_| StorageError::InvalidUrl(url.to_string()))?;

        let clean = validate_relative_path(Path::new(decoded.as_ref()))
            .map_err(|_| StorageError::InvalidUrl(url.to_string()))?;

        Ok(self.root.join(clean))
    }

    fn url_for(&self, folder: &str, filename: &str) -> String {
        let encoded = urlencoding::encode(filename);
        if folder.is_empty() {
            format!("{}/{}", self.base_url, encoded)
        } else {
            format!("{}/{}/{}", self.base_url, folder, encoded)
        }
    }
}

#[async_trait]
impl UploadProvider for LocalProvider {
    fn name(&self) -> &str {
        LOCAL_PROVIDER
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn upload_file(
        &self,
        file: &UploadFile,
        options: &UploadOptions,
    ) -> StorageResult<UploadResult> {
        let folder = options.resolved_folder();
        let filename = unique_object_name(file, options.kind);

        let relative = validate_relative_path(&Path::new(&folder).join(&filename))
            .map_err(|e| StorageError::InvalidFile(e.to_string()))?;
        let destination = self.root.join(&relative);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::upload_failed(LOCAL_PROVIDER, e))?;
        }
        tokio::fs::write(&destination, &file.bytes)
            .await
            .map_err(|e| StorageError::upload_failed(LOCAL_PROVIDER, e))?;

        let mut metadata = options.metadata.clone();
        metadata.insert(SHA256_METADATA_KEY.to_string(), sha256_hex(&file.bytes));

        log_info(
            "storage",
            &format!("Stored {} ({} bytes)", destination.display(), file.size()),
        )
        .unwrap_or_default();

        Ok(UploadResult {
            url: self.url_for(&folder, &filename),
            filename,
            original_name: file.original_name.clone(),
            mimetype: file.content_type.clone(),
            size: file.size(),
            path: Some(destination),
            uploaded_at: Utc::now(),
            provider: LOCAL_PROVIDER.to_string(),
            metadata,
        })
    }

    async fn delete_file(&self, url: &str) -> StorageResult<()> {
        let path = self.path_for_url(url)?;

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::delete_failed(
                LOCAL_PROVIDER,
                format!("file not found: {}", path.display()),
            ));
        }

        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::delete_failed(LOCAL_PROVIDER, e))?;

        log_info("storage", &format!("Deleted {}", path.display())).unwrap_or_default();
        Ok(())
    }

    async fn file_exists(&self, url: &str) -> StorageResult<bool> {
        let path = self.path_for_url(url)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn file_url(&self, filename: &str, kind: UploadKind) -> String {
        self.url_for(kind.default_folder(), filename)
    }

    fn owns_url(&self, url: &str) -> bool {
        self.path_for_url(url).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BASE: &str = "http://localhost:3000/uploads";

    #[tokio::test]
    async fn test_upload_writes_under_folder() {
        let dir = tempdir().unwrap();
        let provider = LocalProvider::new(dir.path(), BASE);
        let file = UploadFile::new("label.png", "image/png", b"png-bytes".to_vec());

        let result = provider
            .upload_file(&file, &UploadOptions::kind(UploadKind::Serial))
            .await
            .unwrap();

        assert!(result.filename.starts_with("serial-"));
        assert!(result.filename.ends_with(".png"));
        assert_eq!(
            result.url,
            format!("http://localhost:3000/uploads/serial-numbers/{}", result.filename)
        );
        assert_eq!(result.original_name, "label.png");
        assert_eq!(result.provider, "local");
        assert_eq!(result.size, 9);
        assert_eq!(result.metadata.get("sha256").unwrap(), &sha256_hex(b"png-bytes"));

        let stored = dir.path().join("serial-numbers").join(&result.filename);
        assert_eq!(result.path.as_deref(), Some(stored.as_path()));
        assert_eq!(std::fs::read(stored).unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn test_same_original_name_never_collides() {
        let dir = tempdir().unwrap();
        let provider = LocalProvider::new(dir.path(), BASE);
        let options = UploadOptions::kind(UploadKind::Serial);

        let photo = |bytes: &[u8]| UploadFile::new("IMG_0001.jpg", "image/jpeg", bytes.to_vec());

        let first = provider.upload_file(&photo(b"parcel-A"), &options).await.unwrap();
        let second = provider.upload_file(&photo(b"parcel-B"), &options).await.unwrap();
        assert_ne!(first.url, second.url);

        let first_path = provider.path_for_url(&first.url).unwrap();
        assert_eq!(std::fs::read(first_path).unwrap(), b"parcel-A");

        provider.delete_file(&first.url).await.unwrap();
        assert!(!provider.file_exists(&first.url).await.unwrap());
        assert!(provider.file_exists(&second.url).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_then_missing() {
        let dir = tempdir().unwrap();
        let provider = LocalProvider::new(dir.path(), BASE);
        let file = UploadFile::new("item one.jpg", "image/jpeg", b"jpeg".to_vec());

        let result = provider.upload_file(&file, &UploadOptions::default()).await.unwrap();
        assert!(provider.file_exists(&result.url).await.unwrap());

        provider.delete_file(&result.url).await.unwrap();
        assert!(!provider.file_exists(&result.url).await.unwrap());

        let again = provider.delete_file(&result.url).await;
        assert!(matches!(again, Err(StorageError::DeleteFailed { .. })));
    }

    #[test]
    fn test_path_for_url_rejects_traversal() {
        let provider = LocalProvider::new("/srv/uploads", BASE);

        let err = provider
            .path_for_url("http://localhost:3000/uploads/item-images/../../etc/passwd")
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl(_)));

        let err = provider.path_for_url("https://cdn.example.com/a.png").unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl(_)));

        let err = provider
            .path_for_url("http://localhost:3000/uploads/%2e%2e/secret")
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl(_)));
    }

    #[test]
    fn test_path_for_url_decodes() {
        let provider = LocalProvider::new("/srv/uploads", BASE);
        let path = provider
            .path_for_url("http://localhost:3000/uploads/item-images/a%20b.png?v=2")
            .unwrap();
        assert_eq!(path, PathBuf::from("/srv/uploads/item-images/a b.png"));
    }

    #[test]
    fn test_file_url() {
        let provider = LocalProvider::new("/srv/uploads", "http://localhost:3000/uploads/");
        assert_eq!(
            provider.file_url("x.png", UploadKind::Item),
            "http://localhost:3000/uploads/item-images/x.png"
        );
    }
}
