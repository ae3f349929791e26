//! Serial-number extraction from tracking-barcode images.

use crate::logging::log_info;
use crate::parcels::OcrResult;
use crate::storage::hashing::sha256_hex;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;

pub const MOCK_OCR_PROVIDER: &str = "mock-ocr";

const MOCK_SERIAL_NUMBERS: [&str; 4] = ["SN123456789", "PKG-2024-001", "INV-ABC-123", "SERIAL-XYZ-789"];
const MOCK_CONFIDENCE: f64 = 0.95;

// Tried in order; the first match wins
static SERIAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"[A-Z]{2,3}[-_]?\d{6,}",
        r"\d{8,}",
        r"[A-Z]{3,}-[A-Z0-9]{3,}",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR provider '{0}' not found")]
    ProviderNotFound(String),

    #[error("OCR processing failed: {0}")]
    ProcessingFailed(String),
}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Raw text read from the image at `image_url`
    async fn extract_text(&self, image_url: &str) -> Result<OcrResult, OcrError>;
}

/// Stand-in provider returning one of a few fixed serials.
///
/// The serial is picked from the SHA-256 of the image URL, so the same image
/// always reads the same way.
pub struct MockOcrProvider {
    delay: Duration,
}

impl MockOcrProvider {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    /// Simulate recognition latency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn serial_for(image_url: &str) -> &'static str {
        let digest = sha256_hex(image_url.as_bytes());
        let index = u8::from_str_radix(&digest[..2], 16).unwrap_or(0) as usize;
        MOCK_SERIAL_NUMBERS[index % MOCK_SERIAL_NUMBERS.len()]
    }
}

impl Default for MockOcrProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrProvider for MockOcrProvider {
    fn name(&self) -> &str {
        MOCK_OCR_PROVIDER
    }

    async fn extract_text(&self, image_url: &str) -> Result<OcrResult, OcrError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        Ok(OcrResult {
            extracted_text: Self::serial_for(image_url).to_string(),
            confidence: MOCK_CONFIDENCE,
            processed_at: Utc::now(),
            provider: MOCK_OCR_PROVIDER.to_string(),
            error: None,
        })
    }
}

/// Reduce raw OCR output to the most serial-like token.
pub fn clean_extracted_text(text: &str) -> String {
    let cleaned = match WHITESPACE.as_ref() {
        Some(whitespace) => whitespace.replace_all(text, " ").trim().to_string(),
        None => text.split_whitespace().collect::<Vec<_>>().join(" "),
    };

    for pattern in SERIAL_PATTERNS.iter() {
        if let Some(found) = pattern.find(&cleaned) {
            return found.as_str().to_string();
        }
    }

    cleaned
        .split(' ')
        .find(|word| {
            word.chars().count() >= 6
                && word.chars().any(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        })
        .map(str::to_string)
        .unwrap_or(cleaned)
}

/// Registered OCR providers plus the default.
pub struct OcrService {
    providers: BTreeMap<String, Arc<dyn OcrProvider>>,
    default_provider: String,
}

impl OcrService {
    /// Service with only the mock provider, which is also the default
    pub fn new() -> Self {
        let mut service = Self {
            providers: BTreeMap::new(),
            default_provider: MOCK_OCR_PROVIDER.to_string(),
        };
        service.register_provider(Arc::new(MockOcrProvider::new()));
        service
    }

    pub fn register_provider(&mut self, provider: Arc<dyn OcrProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn set_default_provider(&mut self, name: &str) -> Result<(), OcrError> {
        if !self.providers.contains_key(name) {
            return Err(OcrError::ProviderNotFound(name.to_string()));
        }
        self.default_provider = name.to_string();
        Ok(())
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn available_providers(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Run OCR on an image and clean the text down to a serial number.
    pub async fn extract_serial_number(
        &self,
        image_url: &str,
        provider: Option<&str>,
    ) -> Result<OcrResult, OcrError> {
        let name = provider.unwrap_or(&self.default_provider);
        let provider = self
            .providers
            .get(name)
            .ok_or_else(|| OcrError::ProviderNotFound(name.to_string()))?;

        let mut result = provider.extract_text(image_url).await.map_err(|e| match e {
            OcrError::ProcessingFailed(reason) => OcrError::ProcessingFailed(reason),
            other => OcrError::ProcessingFailed(other.to_string()),
        })?;
        result.extracted_text = clean_extracted_text(&result.extracted_text);

        log_info(
            "ocr",
            &format!(
                "{} read '{}' from {} (confidence {:.2})",
                name, result.extracted_text, image_url, result.confidence
            ),
        )
        .unwrap_or_default();

        Ok(result)
    }
}

impl Default for OcrService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProvider;

    #[async_trait]
    impl OcrProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn extract_text(&self, _image_url: &str) -> Result<OcrResult, OcrError> {
            Err(OcrError::ProcessingFailed("image too dark".to_string()))
        }
    }

    #[test]
    fn test_clean_extracted_text_patterns() {
        assert_eq!(clean_extracted_text("Label:\n SN123456789 \t ok"), "SN123456789");
        assert_eq!(clean_extracted_text("ref PKG_1234567"), "PKG_1234567");
        assert_eq!(clean_extracted_text("order 1234567890 shipped"), "1234567890");
        assert_eq!(clean_extracted_text("INV-ABC-123"), "INV-ABC");
        assert_eq!(clean_extracted_text("PKG-2024-001"), "PKG-2024");
    }

    #[test]
    fn test_clean_extracted_text_fallbacks() {
        assert_eq!(clean_extracted_text("see parcel Box42xyz"), "Box42xyz");
        assert_eq!(clean_extracted_text("  no   serial here "), "no serial here");
    }

    #[test]
    fn test_mock_serial_is_deterministic() {
        let url = "http://localhost:3000/uploads/serial-numbers/label.png";
        assert_eq!(MockOcrProvider::serial_for(url), MockOcrProvider::serial_for(url));
        assert!(MOCK_SERIAL_NUMBERS.contains(&MockOcrProvider::serial_for(url)));
    }

    #[tokio::test]
    async fn test_extract_serial_number_cleans_mock_output() {
        let service = OcrService::new();
        let url = "http://localhost:3000/uploads/serial-numbers/a.png";

        let result = service.extract_serial_number(url, None).await.unwrap();
        assert_eq!(result.provider, "mock-ocr");
        assert_eq!(result.confidence, 0.95);
        assert_eq!(
            result.extracted_text,
            clean_extracted_text(MockOcrProvider::serial_for(url))
        );
    }

    #[tokio::test]
    async fn test_unknown_and_failing_providers() {
        let mut service = OcrService::new();
        let err = service
            .extract_serial_number("x", Some("tesseract"))
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::ProviderNotFound(_)));

        service.register_provider(Arc::new(FailingProvider));
        service.set_default_provider("failing").unwrap();
        let err = service.extract_serial_number("x", None).await.unwrap_err();
        assert_eq!(err.to_string(), "OCR processing failed: image too dark");

        assert!(service.set_default_provider("nope").is_err());
        assert_eq!(service.available_providers(), vec!["failing", "mock-ocr"]);
    }
}
