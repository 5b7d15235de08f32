//! [`EventSink`] implementation backed by SQLite and the crop file store.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use patron_track::{
    Customer, CustomerId, CropId, EventId, EventMetadata, EventSink, NewCrop, NewEvent, Segment,
    SinkError,
};

use crate::crops::CropStore;
use crate::db::Database;
use crate::StoreError;

pub struct SqliteSink {
    db: Arc<Database>,
    crops: CropStore,
}

impl SqliteSink {
    pub fn new(db: Arc<Database>, crops: CropStore) -> SqliteSink {
        SqliteSink { db, crops }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl From<StoreError> for SinkError {
    fn from(err: StoreError) -> SinkError {
        match err {
            StoreError::Io(e) => SinkError::Io(e),
            other => SinkError::Storage(other.to_string()),
        }
    }
}

impl EventSink for SqliteSink {
    fn create_event(&self, event: NewEvent) -> Result<EventId, SinkError> {
        let now = Utc::now();
        let customer_id = event.customer_id;
        let id = self.db.add_event(&event, now)?;
        // A fresh event for a known customer counts as a visit.
        if let Some(customer_id) = customer_id {
            self.db.record_visit(customer_id, now)?;
        }
        debug!(event_id = id, event_type = %event.event_type, "event stored");
        Ok(id)
    }

    fn event_metadata(&self, event_id: EventId) -> Result<Option<EventMetadata>, SinkError> {
        Ok(self.db.event_metadata(event_id)?)
    }

    fn update_event_metadata(
        &self,
        event_id: EventId,
        metadata: &EventMetadata,
    ) -> Result<(), SinkError> {
        Ok(self.db.update_event_metadata(event_id, metadata)?)
    }

    fn save_crop(&self, crop: NewCrop) -> Result<CropId, SinkError> {
        let now = Utc::now();
        let path = self.crops.save(&crop, now)?;
        let id = self.db.add_crop(&path.to_string_lossy(), &crop, now)?;
        Ok(id)
    }

    fn customer(&self, id: CustomerId) -> Result<Option<Customer>, SinkError> {
        Ok(self.db.customer(id)?)
    }

    fn customer_by_face_id(&self, face_id: &str) -> Result<Option<Customer>, SinkError> {
        Ok(self.db.customer_by_face_id(face_id)?)
    }

    fn add_customer(
        &self,
        face_id: &str,
        name: &str,
        segment: Segment,
    ) -> Result<Customer, SinkError> {
        Ok(self.db.add_customer(face_id, name, segment, Utc::now())?)
    }
}
