use super::types::{EventSequence, ParcelEvent, ParcelEventPayload};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type EventReceiver = broadcast::Receiver<ParcelEvent>;

#[derive(Debug, Error)]
pub enum PublishError {
    /// The event was numbered but nobody received it
    #[error("No subscribers for event {sequence} ({kind})")]
    NoSubscribers {
        sequence: EventSequence,
        kind: &'static str,
    },
}

/// Fan-out of parcel lifecycle events to in-process listeners (the OCR worker,
/// tests). Sequence numbers start at 1 and are shared by every clone.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ParcelEvent>,
    next_sequence: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            next_sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn publish(
        &self,
        parcel_id: Uuid,
        payload: ParcelEventPayload,
    ) -> Result<EventSequence, PublishError> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let event = ParcelEvent {
            sequence,
            timestamp: Utc::now(),
            parcel_id,
            payload,
        };
        let kind = event.kind();

        match self.sender.send(event) {
            Ok(_) => Ok(sequence),
            Err(_) => Err(PublishError::NoSubscribers { sequence, kind }),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Sequence the next published event will get
    pub fn current_sequence(&self) -> EventSequence {
        self.next_sequence.load(Ordering::SeqCst)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
