mod bus;
mod handlers;
mod types;

pub use bus::{EventBus, EventReceiver, PublishError};
pub use handlers::{process_ocr, OcrWorker};
pub use types::{EventSequence, ParcelEvent, ParcelEventPayload};
