//! Parcel intake backend: image uploads through pluggable storage providers,
//! audited parcel records, OCR of tracking labels and a JSON HTTP API.

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod http;
pub mod logging;
pub mod ocr;
pub mod parcels;
pub mod shutdown;
pub mod storage;
pub mod validation;

pub use error::{IntakeError, Result};
