//! Persistence seam. The tracker talks to storage only through
//! [`EventSink`], so the state machine can be tested against a mock and the
//! daemon can plug in SQLite without the tracker knowing.

use thiserror::Error;

use crate::model::{
    Bbox, CameraId, CropId, CropImage, Customer, CustomerId, EventId, EventMetadata, EventType,
    Segment,
};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Payload for a newly opened event row.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub customer_id: Option<CustomerId>,
    pub customer_name: Option<String>,
    pub camera_id: CameraId,
    pub confidence: f32,
    pub metadata: EventMetadata,
}

/// Payload for a captured face crop.
#[derive(Debug, Clone)]
pub struct NewCrop {
    pub image: CropImage,
    pub customer_name: Option<String>,
    pub customer_id: Option<CustomerId>,
    pub event_id: Option<EventId>,
    pub bbox: Bbox,
    pub confidence: f32,
}

pub trait EventSink: Send + Sync {
    /// Open a new event row and return its id.
    fn create_event(&self, event: NewEvent) -> Result<EventId, SinkError>;

    /// Fetch the stored metadata for an event, if any.
    fn event_metadata(&self, event_id: EventId) -> Result<Option<EventMetadata>, SinkError>;

    fn update_event_metadata(
        &self,
        event_id: EventId,
        metadata: &EventMetadata,
    ) -> Result<(), SinkError>;

    fn save_crop(&self, crop: NewCrop) -> Result<CropId, SinkError>;

    fn customer(&self, id: CustomerId) -> Result<Option<Customer>, SinkError>;

    fn customer_by_face_id(&self, face_id: &str) -> Result<Option<Customer>, SinkError>;

    /// Register a customer for a face label and return the stored record.
    fn add_customer(
        &self,
        face_id: &str,
        name: &str,
        segment: Segment,
    ) -> Result<Customer, SinkError>;
}
