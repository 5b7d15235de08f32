//! Visit sessions and event lifecycle for recognized and unknown faces.

pub mod model;
pub mod sink;
pub mod tracker;

pub use model::{
    event_type_for_segment, format_duration, Bbox, CameraId, CropId, CropImage, Customer,
    CustomerId, EventId, EventMetadata, EventType, Segment,
};
pub use sink::{EventSink, NewCrop, NewEvent, SinkError};
pub use tracker::{Observation, SessionTracker, Subject, DEFAULT_DETECTION_COOLDOWN_SECS};
