use super::{EventBus, ParcelEvent, ParcelEventPayload};
use crate::error::Result;
use crate::logging::{log_debug, log_error, log_info, log_warn};
use crate::ocr::OcrService;
use crate::parcels::{ParcelRecord, ParcelStatus, ParcelStore};
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Run OCR on a parcel's barcode image and persist the outcome.
///
/// Success stores the result (status `processed`), failure marks the parcel
/// `failed`; either way an event is published. `None` when the parcel was
/// deleted in the meantime.
pub async fn process_ocr(
    store: &ParcelStore,
    ocr: &OcrService,
    event_bus: &EventBus,
    parcel_id: Uuid,
    image_url: &str,
) -> Result<Option<ParcelRecord>> {
    match ocr.extract_serial_number(image_url, None).await {
        Ok(result) => {
            let payload = ParcelEventPayload::OcrCompleted {
                tracking_number: result.extracted_text.clone(),
                confidence: result.confidence,
            };
            let updated = store.update_ocr_result(&parcel_id, result)?;
            if updated.is_some() {
                publish(event_bus, parcel_id, payload);
            }
            Ok(updated)
        }
        Err(e) => {
            let reason = e.to_string();
            log_warn("ocr", &format!("OCR failed for parcel {}: {}", parcel_id, reason))
                .unwrap_or_default();
            let updated = store.mark_failed(&parcel_id, &reason)?;
            if updated.is_some() {
                publish(event_bus, parcel_id, ParcelEventPayload::OcrFailed { reason });
            }
            Ok(updated)
        }
    }
}

fn publish(event_bus: &EventBus, parcel_id: Uuid, payload: ParcelEventPayload) {
    // Nobody listening is fine
    if let Err(e) = event_bus.publish(parcel_id, payload) {
        log_debug("events", &format!("{} ({})", e, parcel_id)).unwrap_or_default();
    }
}

/// Background worker that runs OCR for every received parcel
pub struct OcrWorker {
    event_bus: EventBus,
    store: ParcelStore,
    ocr: Arc<OcrService>,
    shutdown: ShutdownCoordinator,
}

impl OcrWorker {
    pub fn new(
        event_bus: EventBus,
        store: ParcelStore,
        ocr: Arc<OcrService>,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            event_bus,
            store,
            ocr,
            shutdown,
        }
    }

    /// Subscribe and spawn the worker loop. Subscription happens before this
    /// returns, so events published afterwards are never missed.
    pub fn start(self) -> JoinHandle<()> {
        let mut rx = self.event_bus.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = rx.recv() => {
                        match result {
                            Ok(event) => {
                                if let Err(e) = self.handle_event(&event).await {
                                    log_error("ocr", &format!("OCR worker error for parcel {}: {}", event.parcel_id, e))
                                        .unwrap_or_default();
                                }
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                log_info("events", "OCR worker stopped (event bus closed)").unwrap_or_default();
                                break;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log_warn("events", &format!("OCR worker lagged {} events, rescanning pending parcels", n))
                                    .unwrap_or_default();
                                if let Err(e) = self.process_pending().await {
                                    log_error("ocr", &format!("Pending parcel rescan failed: {}", e))
                                        .unwrap_or_default();
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        log_info("events", "OCR worker gracefully shutting down").unwrap_or_default();
                        break;
                    }
                }
            }
        })
    }

    async fn handle_event(&self, event: &ParcelEvent) -> Result<()> {
        let ParcelEventPayload::Received {
            tracking_barcode_url: Some(url),
            ..
        } = &event.payload
        else {
            return Ok(());
        };

        // Already handled by a rescan, or deleted
        match self.store.find_by_id(&event.parcel_id)? {
            Some(record) if record.status == ParcelStatus::Pending => {}
            _ => return Ok(()),
        }

        process_ocr(&self.store, &self.ocr, &self.event_bus, event.parcel_id, url).await?;
        Ok(())
    }

    /// Run OCR for every pending parcel with a barcode image. Recovers the
    /// `received` events dropped when the receiver falls behind.
    async fn process_pending(&self) -> Result<usize> {
        let pending = self.store.find_by_status(ParcelStatus::Pending)?;
        let mut processed = 0;

        for record in pending {
            let Some(url) = record.tracking_barcode_url.as_deref() else {
                continue;
            };
            if let Err(e) = process_ocr(&self.store, &self.ocr, &self.event_bus, record.id, url).await {
                log_error("ocr", &format!("OCR worker error for parcel {}: {}", record.id, e))
                    .unwrap_or_default();
                continue;
            }
            processed += 1;
        }

        log_info("ocr", &format!("Rescan processed {} pending parcels", processed))
            .unwrap_or_default();
        Ok(processed)
    }
}
