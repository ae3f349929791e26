use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sequence number for ordering events
pub type EventSequence = u64;

/// Parcel lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelEvent {
    pub sequence: EventSequence,
    pub timestamp: DateTime<Utc>,
    pub parcel_id: Uuid,
    pub payload: ParcelEventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParcelEventPayload {
    /// Parcel stored with its images; OCR worker picks it up from here
    Received {
        tracking_barcode_url: Option<String>,
        image_count: usize,
    },

    OcrCompleted {
        tracking_number: String,
        confidence: f64,
    },

    OcrFailed {
        reason: String,
    },

    Deleted,
}

impl ParcelEvent {
    /// Snake-case name of the payload, as in its serialized `type` tag
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            ParcelEventPayload::Received { .. } => "received",
            ParcelEventPayload::OcrCompleted { .. } => "ocr_completed",
            ParcelEventPayload::OcrFailed { .. } => "ocr_failed",
            ParcelEventPayload::Deleted => "deleted",
        }
    }
}
