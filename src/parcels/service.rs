use super::model::{Channel, ParcelRecord, ParcelStatus, ParcelUpdate};
use super::store::{ChannelCount, ParcelPage, ParcelQuery, ParcelStore, StatusCount};
use crate::error::{IntakeError, Result};
use crate::events::{process_ocr, EventBus, ParcelEventPayload};
use crate::logging::{log_debug, log_info, log_warn};
use crate::ocr::OcrService;
use crate::storage::{StorageRegistry, UploadFile, UploadKind, UploadOptions};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Everything captured at the intake desk for one parcel
#[derive(Debug, Clone, Default)]
pub struct NewParcel {
    pub tracking_barcode: Option<UploadFile>,
    pub parcel_images: Vec<UploadFile>,
    pub tracking_number: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub channel: Option<Channel>,
    pub quantity: Option<i64>,
    pub sourced_by: Option<String>,
    pub created_by: Option<String>,
    /// Storage provider override; the registry default otherwise
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelStats {
    pub total: u64,
    pub by_status: Vec<StatusCount>,
    pub by_channel: Vec<ChannelCount>,
}

/// Intake workflow on top of the store, the storage registry and OCR.
#[derive(Clone)]
pub struct ParcelIntakeService {
    store: ParcelStore,
    storage: Arc<StorageRegistry>,
    ocr: Arc<OcrService>,
    event_bus: EventBus,
    max_parcel_images: usize,
}

impl ParcelIntakeService {
    pub fn new(
        store: ParcelStore,
        storage: Arc<StorageRegistry>,
        ocr: Arc<OcrService>,
        event_bus: EventBus,
        max_parcel_images: usize,
    ) -> Self {
        Self {
            store,
            storage,
            ocr,
            event_bus,
            max_parcel_images,
        }
    }

    pub fn store(&self) -> &ParcelStore {
        &self.store
    }

    pub fn storage(&self) -> &StorageRegistry {
        &self.storage
    }

    /// Upload a parcel's images, persist the record and queue OCR.
    ///
    /// The barcode is stored first so the record is created with its URL;
    /// parcel images follow and are attached in a second save. Anything
    /// uploaded before a failure is removed again.
    pub async fn receive(&self, parcel: NewParcel) -> Result<ParcelRecord> {
        if parcel.parcel_images.len() > self.max_parcel_images {
            return Err(IntakeError::Validation(format!(
                "At most {} parcel images are allowed",
                self.max_parcel_images
            )));
        }
        if parcel.quantity.is_some_and(|q| q < 0) {
            return Err(IntakeError::Validation(
                "Quantity must not be negative".to_string(),
            ));
        }

        let provider = parcel.provider.as_deref();
        let options_for = |kind: UploadKind| {
            let options = UploadOptions::kind(kind);
            match provider {
                Some(name) => options.with_provider(name),
                None => options,
            }
        };

        let barcode_url = match &parcel.tracking_barcode {
            Some(file) => Some(
                self.storage
                    .upload(file, &options_for(UploadKind::Serial))
                    .await?
                    .url,
            ),
            None => None,
        };
        let mut uploaded: Vec<String> = barcode_url.iter().cloned().collect();

        let mut record = ParcelRecord::new();
        record.tracking_barcode_url = barcode_url.clone();
        record.tracking_number = parcel.tracking_number;
        record.description = parcel.description;
        record.category = parcel.category;
        record.channel = parcel.channel;
        record.quantity = parcel.quantity;
        record.sourced_by = parcel.sourced_by;
        record.created_by = parcel.created_by.clone();
        record.updated_by = parcel.created_by;

        if let Err(e) = self.store.save(&mut record) {
            self.remove_orphans(&uploaded, provider).await;
            return Err(e);
        }

        if !parcel.parcel_images.is_empty() {
            let images = match self
                .storage
                .upload_many(&parcel.parcel_images, &options_for(UploadKind::Item))
                .await
            {
                Ok(images) => images,
                Err((partial, e)) => {
                    uploaded.extend(partial.into_iter().map(|r| r.url));
                    self.discard(&record.id, &uploaded, provider).await;
                    return Err(e.into());
                }
            };
            let image_urls: Vec<String> = images.into_iter().map(|r| r.url).collect();
            uploaded.extend(image_urls.iter().cloned());

            record.parcel_image_urls = image_urls;
            if let Err(e) = self.store.save(&mut record) {
                self.discard(&record.id, &uploaded, provider).await;
                return Err(e);
            }
        }

        log_info(
            "parcels",
            &format!(
                "Received parcel {} with {} image(s)",
                record.id,
                record.parcel_image_urls.len()
            ),
        )
        .unwrap_or_default();

        self.publish(
            record.id,
            ParcelEventPayload::Received {
                tracking_barcode_url: barcode_url,
                image_count: record.parcel_image_urls.len(),
            },
        );

        Ok(record)
    }

    pub fn get(&self, id: &Uuid) -> Result<ParcelRecord> {
        self.store.get(id)
    }

    pub fn list(&self, query: &ParcelQuery) -> Result<ParcelPage> {
        self.store.list(query)
    }

    pub fn search(&self, term: &str) -> Result<Vec<ParcelRecord>> {
        if term.trim().is_empty() {
            return Err(IntakeError::Validation(
                "Search term must not be empty".to_string(),
            ));
        }
        self.store.search(term.trim())
    }

    pub fn update(&self, id: &Uuid, update: ParcelUpdate) -> Result<ParcelRecord> {
        update.validate()?;
        self.store
            .modify(id, |record| record.apply_update(update))?
            .ok_or_else(|| not_found(id))
    }

    /// Remove the record, then its images; image failures are only logged.
    pub async fn delete(&self, id: &Uuid) -> Result<ParcelRecord> {
        let record = self.store.delete(id)?.ok_or_else(|| not_found(id))?;

        let failures = self.storage.delete_many(&record.image_urls(), None).await;
        for (url, e) in &failures {
            log_warn(
                "parcels",
                &format!("Could not delete image {} of parcel {}: {}", url, id, e),
            )
            .unwrap_or_default();
        }

        log_info("parcels", &format!("Deleted parcel {}", id)).unwrap_or_default();
        self.publish(record.id, ParcelEventPayload::Deleted);
        Ok(record)
    }

    /// Reset to pending and run OCR on the barcode image right away
    pub async fn reprocess_ocr(&self, id: &Uuid) -> Result<ParcelRecord> {
        let record = self.store.get(id)?;
        let barcode_url = record.tracking_barcode_url.clone().ok_or_else(|| {
            IntakeError::Validation(
                "No tracking barcode image found for OCR processing".to_string(),
            )
        })?;

        self.store
            .modify(id, |record| record.status = ParcelStatus::Pending)?
            .ok_or_else(|| not_found(id))?;

        process_ocr(&self.store, &self.ocr, &self.event_bus, *id, &barcode_url)
            .await?
            .ok_or_else(|| not_found(id))
    }

    pub fn mark_returned(&self, id: &Uuid, updated_by: Option<String>) -> Result<ParcelRecord> {
        self.store
            .modify(id, |record| {
                record.mark_returned();
                if updated_by.is_some() {
                    record.updated_by = updated_by;
                }
            })?
            .ok_or_else(|| not_found(id))
    }

    pub fn stats(&self) -> Result<ParcelStats> {
        Ok(ParcelStats {
            total: self.store.count()?,
            by_status: self.store.stats_by_status()?,
            by_channel: self.store.stats_by_channel()?,
        })
    }

    /// Roll back a half-finished intake
    async fn discard(&self, id: &Uuid, uploaded: &[String], provider: Option<&str>) {
        if let Err(e) = self.store.delete(id) {
            log_warn(
                "parcels",
                &format!("Could not remove incomplete parcel {}: {}", id, e),
            )
            .unwrap_or_default();
        }
        self.remove_orphans(uploaded, provider).await;
    }

    async fn remove_orphans(&self, urls: &[String], provider: Option<&str>) {
        if urls.is_empty() {
            return;
        }
        let failures = self.storage.delete_many(urls, provider).await;
        for (url, e) in &failures {
            log_warn("parcels", &format!("Orphaned upload {}: {}", url, e)).unwrap_or_default();
        }
    }

    fn publish(&self, parcel_id: Uuid, payload: ParcelEventPayload) {
        if let Err(e) = self.event_bus.publish(parcel_id, payload) {
            log_debug("events", &format!("{} ({})", e, parcel_id)).unwrap_or_default();
        }
    }
}

fn not_found(id: &Uuid) -> IntakeError {
    IntakeError::NotFound(format!("Parcel {}", id))
}
