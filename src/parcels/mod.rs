pub mod model;
pub mod service;
pub mod store;

pub use model::{
    Channel, HistoryAction, HistoryEntry, OcrResult, ParcelRecord, ParcelSnapshot, ParcelStatus,
    ParcelUpdate, FAILED_OCR_PROVIDER,
};
pub use service::{NewParcel, ParcelIntakeService, ParcelStats};
pub use store::{ChannelCount, ParcelPage, ParcelQuery, ParcelStore, StatusCount};
