use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::IntakeError;

/// Provider name recorded on OCR results of failed runs
pub const FAILED_OCR_PROVIDER: &str = "failed";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParcelStatus {
    #[default]
    Pending,
    Processed,
    Returned,
    Failed,
}

impl ParcelStatus {
    pub const ALL: [ParcelStatus; 4] = [
        ParcelStatus::Pending,
        ParcelStatus::Processed,
        ParcelStatus::Returned,
        ParcelStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParcelStatus::Pending => "pending",
            ParcelStatus::Processed => "processed",
            ParcelStatus::Returned => "returned",
            ParcelStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ParcelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParcelStatus {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParcelStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| IntakeError::Validation(format!("Unknown parcel status '{}'", s)))
    }
}

/// Marketplace a parcel was sourced from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Taobao,
    Alibaba,
    Xianyu,
    Xianzhu,
    Others,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Taobao,
        Channel::Alibaba,
        Channel::Xianyu,
        Channel::Xianzhu,
        Channel::Others,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Taobao => "taobao",
            Channel::Alibaba => "alibaba",
            Channel::Xianyu => "xianyu",
            Channel::Xianzhu => "xianzhu",
            Channel::Others => "others",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Channel::ALL
            .into_iter()
            .find(|channel| channel.as_str() == lower)
            .ok_or_else(|| IntakeError::Validation(format!("Unknown channel '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub extracted_text: String,
    pub confidence: f64,
    pub processed_at: DateTime<Utc>,
    #[serde(rename = "ocrProvider")]
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OcrResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            extracted_text: String::new(),
            confidence: 0.0,
            processed_at: Utc::now(),
            provider: FAILED_OCR_PROVIDER.to_string(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Create,
    Update,
}

/// Record state at one point in time; every field of [`ParcelRecord`] but the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelSnapshot {
    pub id: Uuid,
    pub tracking_number: Option<String>,
    pub tracking_barcode_url: Option<String>,
    pub parcel_image_urls: Vec<String>,
    pub ocr_result: Option<OcrResult>,
    pub status: ParcelStatus,
    pub channel: Option<Channel>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub quantity: Option<i64>,
    pub sourced_by: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub at: DateTime<Utc>,
    pub snapshot: ParcelSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelRecord {
    pub id: Uuid,
    pub tracking_number: Option<String>,
    pub tracking_barcode_url: Option<String>,
    pub parcel_image_urls: Vec<String>,
    pub ocr_result: Option<OcrResult>,
    pub status: ParcelStatus,
    pub channel: Option<Channel>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub quantity: Option<i64>,
    pub sourced_by: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Append-only; written by the store on every save
    pub history: Vec<HistoryEntry>,
}

impl ParcelRecord {
    /// A new, unsaved record
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tracking_number: None,
            tracking_barcode_url: None,
            parcel_image_urls: Vec::new(),
            ocr_result: None,
            status: ParcelStatus::Pending,
            channel: None,
            description: None,
            category: None,
            quantity: None,
            sourced_by: None,
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> ParcelSnapshot {
        ParcelSnapshot {
            id: self.id,
            tracking_number: self.tracking_number.clone(),
            tracking_barcode_url: self.tracking_barcode_url.clone(),
            parcel_image_urls: self.parcel_image_urls.clone(),
            ocr_result: self.ocr_result.clone(),
            status: self.status,
            channel: self.channel,
            description: self.description.clone(),
            category: self.category.clone(),
            quantity: self.quantity,
            sourced_by: self.sourced_by.clone(),
            created_by: self.created_by.clone(),
            updated_by: self.updated_by.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Every stored image URL, barcode first
    pub fn image_urls(&self) -> Vec<String> {
        self.tracking_barcode_url
            .iter()
            .chain(self.parcel_image_urls.iter())
            .cloned()
            .collect()
    }

    pub fn apply_ocr_result(&mut self, result: OcrResult) {
        self.tracking_number = Some(result.extracted_text.clone());
        self.ocr_result = Some(result);
        self.status = ParcelStatus::Processed;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ParcelStatus::Failed;
        self.ocr_result = Some(OcrResult::failed(error));
    }

    pub fn mark_processed(&mut self) {
        self.status = ParcelStatus::Processed;
    }

    pub fn mark_returned(&mut self) {
        self.status = ParcelStatus::Returned;
    }

    pub fn apply_update(&mut self, update: ParcelUpdate) {
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(category) = update.category {
            self.category = Some(category);
        }
        if let Some(quantity) = update.quantity {
            self.quantity = Some(quantity);
        }
        if let Some(channel) = update.channel {
            self.channel = Some(channel);
        }
        if let Some(tracking_number) = update.tracking_number {
            self.tracking_number = Some(tracking_number);
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(sourced_by) = update.sourced_by {
            self.sourced_by = Some(sourced_by);
        }
        if let Some(updated_by) = update.updated_by {
            self.updated_by = Some(updated_by);
        }
    }
}

impl Default for ParcelRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelUpdate {
    pub description: Option<String>,
    pub category: Option<String>,
    pub quantity: Option<i64>,
    pub channel: Option<Channel>,
    pub tracking_number: Option<String>,
    pub status: Option<ParcelStatus>,
    pub sourced_by: Option<String>,
    pub updated_by: Option<String>,
}

impl ParcelUpdate {
    pub fn validate(&self) -> Result<(), IntakeError> {
        if let Some(quantity) = self.quantity {
            if quantity < 0 {
                return Err(IntakeError::Validation(
                    "Quantity must not be negative".to_string(),
                ));
            }
        }
        Ok(())
    }
}
