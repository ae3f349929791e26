//! Upload inputs and results shared by every provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Metadata key carrying the SHA-256 of the uploaded bytes
pub const SHA256_METADATA_KEY: &str = "sha256";

/// Longest extension carried over into a stored object name
const MAX_EXTENSION_LEN: usize = 10;

/// An uploaded file held in memory
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub original_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(
        original_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            original_name: original_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Extension of the original name including the dot, or empty when
    /// there is none or it is not a short alphanumeric one
    pub fn extension(&self) -> String {
        Path::new(&self.original_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| {
                e.len() <= MAX_EXTENSION_LEN && e.bytes().all(|b| b.is_ascii_alphanumeric())
            })
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default()
    }
}

/// What an image depicts; selects the default folder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    /// Tracking barcode / serial number label
    Serial,
    #[default]
    Item,
}

impl UploadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadKind::Serial => "serial",
            UploadKind::Item => "item",
        }
    }

    pub fn default_folder(&self) -> &'static str {
        match self {
            UploadKind::Serial => "serial-numbers",
            UploadKind::Item => "item-images",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub kind: UploadKind,
    /// Overrides the kind's default folder
    pub folder: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Overrides the registry's default provider
    pub provider: Option<String>,
}

impl UploadOptions {
    pub fn kind(kind: UploadKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Folder relative to the provider root, without surrounding slashes
    pub fn resolved_folder(&self) -> String {
        self.folder
            .as_deref()
            .unwrap_or(self.kind.default_folder())
            .trim_matches('/')
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    pub filename: String,
    #[serde(rename = "originalName")]
    pub original_name: String,
    pub mimetype: String,
    pub size: u64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(rename = "uploadedAt")]
    pub uploaded_at: DateTime<Utc>,
    pub provider: String,
    pub metadata: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(UploadFile::new("label.JPG", "image/jpeg", vec![]).extension(), ".jpg");
        assert_eq!(UploadFile::new("noext", "image/png", vec![]).extension(), "");
        assert_eq!(UploadFile::new("a.p?ng", "image/png", vec![]).extension(), "");
    }

    #[test]
    fn test_resolved_folder() {
        assert_eq!(UploadOptions::kind(UploadKind::Serial).resolved_folder(), "serial-numbers");
        assert_eq!(UploadOptions::default().resolved_folder(), "item-images");
        assert_eq!(
            UploadOptions::default().with_folder("/returns/2024/").resolved_folder(),
            "returns/2024"
        );
    }
}
