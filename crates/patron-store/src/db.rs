//! SQLite-backed storage for customers, events, crops and settings.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use patron_track::{
    Customer, CustomerId, CropId, EventId, EventMetadata, NewCrop, NewEvent, Segment,
    DEFAULT_DETECTION_COOLDOWN_SECS,
};

use crate::StoreError;

pub const DEFAULT_REVISIT_THRESHOLD: f64 = 3.0;

/// A stored event row as read back from the database.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: EventId,
    pub event_type: String,
    pub customer_id: Option<CustomerId>,
    pub customer_name: Option<String>,
    pub camera_id: i64,
    pub confidence: f32,
    pub metadata: Option<EventMetadata>,
    pub created_at: DateTime<Utc>,
}

/// Count of stored events per event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeCount {
    pub event_type: String,
    pub count: i64,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Database, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Database, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Database, StoreError> {
        // journal_mode replies with the resulting mode, so it is queried
        // rather than set through pragma_update.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::create_schema(&conn)?;
        debug!("database ready");
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn create_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS customers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                face_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                segment TEXT NOT NULL DEFAULT 'regular',
                total_visits INTEGER NOT NULL DEFAULT 0,
                last_visit_date TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                customer_id INTEGER REFERENCES customers(id),
                customer_name TEXT,
                camera_id INTEGER NOT NULL DEFAULT 0,
                confidence REAL NOT NULL DEFAULT 0,
                metadata TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS crops (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL,
                customer_id INTEGER REFERENCES customers(id),
                customer_name TEXT,
                event_id INTEGER REFERENCES events(id),
                bbox TEXT,
                confidence REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);
            CREATE INDEX IF NOT EXISTS idx_events_customer ON events(customer_id);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
            CREATE INDEX IF NOT EXISTS idx_crops_event ON crops(event_id);",
        )?;
        Ok(())
    }

    pub fn add_event(&self, event: &NewEvent, now: DateTime<Utc>) -> Result<EventId, StoreError> {
        let metadata = serde_json::to_string(&event.metadata)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events (event_type, customer_id, customer_name, camera_id, confidence, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.event_type.as_str(),
                event.customer_id,
                event.customer_name,
                event.camera_id,
                event.confidence as f64,
                metadata,
                now.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, event_type, customer_id, customer_name, camera_id, confidence, metadata, created_at
                 FROM events WHERE id = ?1",
                [id],
                event_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn event_metadata(&self, id: EventId) -> Result<Option<EventMetadata>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<Option<String>> = conn
            .query_row("SELECT metadata FROM events WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        match raw.flatten() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn update_event_metadata(
        &self,
        id: EventId,
        metadata: &EventMetadata,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(metadata)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE events SET metadata = ?1 WHERE id = ?2",
            params![json, id],
        )?;
        if changed == 0 {
            return Err(StoreError::Sql(rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    pub fn recent_events(&self, limit: u32) -> Result<Vec<Event>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, event_type, customer_id, customer_name, camera_id, confidence, metadata, created_at
             FROM events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], event_from_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Number of events created on the calendar day of `now` (UTC).
    pub fn event_count_today(&self, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let day = now.format("%Y-%m-%d").to_string();
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE created_at LIKE ?1 || '%'",
            [day],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn event_stats(&self) -> Result<Vec<EventTypeCount>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT event_type, COUNT(*) FROM events GROUP BY event_type ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EventTypeCount {
                event_type: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        let mut stats = Vec::new();
        for row in rows {
            stats.push(row?);
        }
        Ok(stats)
    }

    pub fn add_crop(
        &self,
        file_path: &str,
        crop: &NewCrop,
        now: DateTime<Utc>,
    ) -> Result<CropId, StoreError> {
        let bbox = serde_json::to_string(&crop.bbox)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO crops (file_path, customer_id, customer_name, event_id, bbox, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                file_path,
                crop.customer_id,
                crop.customer_name,
                crop.event_id,
                bbox,
                crop.confidence as f64,
                now.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_customer(
        &self,
        face_id: &str,
        name: &str,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> Result<Customer, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO customers (face_id, name, segment, total_visits, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![face_id, name, segment.as_str(), now.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Customer {
            id,
            face_id: face_id.to_string(),
            name: name.to_string(),
            segment,
            total_visits: 0,
            last_visit_date: None,
            created_at: Some(now),
        })
    }

    pub fn customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, face_id, name, segment, total_visits, last_visit_date, created_at
                 FROM customers WHERE id = ?1",
                [id],
                customer_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn customer_by_face_id(&self, face_id: &str) -> Result<Option<Customer>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, face_id, name, segment, total_visits, last_visit_date, created_at
                 FROM customers WHERE face_id = ?1",
                [face_id],
                customer_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn customers(&self) -> Result<Vec<Customer>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, face_id, name, segment, total_visits, last_visit_date, created_at
             FROM customers ORDER BY name",
        )?;
        let rows = stmt.query_map([], customer_from_row)?;
        let mut customers = Vec::new();
        for row in rows {
            customers.push(row?);
        }
        Ok(customers)
    }

    pub fn set_customer_segment(
        &self,
        id: CustomerId,
        segment: Segment,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE customers SET segment = ?1 WHERE id = ?2",
            params![segment.as_str(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::Sql(rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    /// Bump the visit counter and stamp the last visit date.
    pub fn record_visit(&self, id: CustomerId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE customers SET total_visits = total_visits + 1, last_visit_date = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn setting_f64(&self, key: &str, default: f64) -> Result<f64, StoreError> {
        Ok(self
            .setting(key)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }

    pub fn detection_cooldown(&self) -> Result<f64, StoreError> {
        self.setting_f64("detection_cooldown", DEFAULT_DETECTION_COOLDOWN_SECS)
    }

    pub fn revisit_threshold(&self) -> Result<f64, StoreError> {
        self.setting_f64("revisit_threshold", DEFAULT_REVISIT_THRESHOLD)
    }
}

fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let metadata: Option<String> = row.get(6)?;
    Ok(Event {
        id: row.get(0)?,
        event_type: row.get(1)?,
        customer_id: row.get(2)?,
        customer_name: row.get(3)?,
        camera_id: row.get(4)?,
        confidence: row.get::<_, f64>(5)? as f32,
        metadata: metadata.and_then(|json| serde_json::from_str(&json).ok()),
        created_at: parse_timestamp(7, row.get(7)?)?,
    })
}

fn customer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Customer> {
    let segment: String = row.get(3)?;
    let last_visit: Option<String> = row.get(5)?;
    let created: Option<String> = row.get(6)?;
    Ok(Customer {
        id: row.get(0)?,
        face_id: row.get(1)?,
        name: row.get(2)?,
        segment: Segment::parse(&segment),
        total_visits: row.get(4)?,
        last_visit_date: last_visit.map(|s| parse_timestamp(5, s)).transpose()?,
        created_at: created.map(|s| parse_timestamp(6, s)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use patron_track::{Bbox, CropImage, EventType};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap()
    }

    fn sample_event(customer_id: Option<CustomerId>) -> NewEvent {
        NewEvent {
            event_type: EventType::RegularVisit,
            customer_id,
            customer_name: customer_id.map(|_| "John".to_string()),
            camera_id: 1,
            confidence: 92.5,
            metadata: EventMetadata {
                face_id: Some("john".into()),
                entry_time: Some(now()),
                confidences: vec![92.5],
                frame_count: 1,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_event_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = db.add_event(&sample_event(None), now()).unwrap();

        let event = db.event(id).unwrap().unwrap();
        assert_eq!(event.event_type, "regular_visit");
        assert_eq!(event.camera_id, 1);
        assert!((event.confidence - 92.5).abs() < 1e-4);
        assert_eq!(event.created_at, now());
        let meta = event.metadata.unwrap();
        assert_eq!(meta.face_id.as_deref(), Some("john"));
        assert_eq!(meta.frame_count, 1);
    }

    #[test]
    fn test_metadata_update() {
        let db = Database::open_in_memory().unwrap();
        let id = db.add_event(&sample_event(None), now()).unwrap();

        let mut meta = db.event_metadata(id).unwrap().unwrap();
        meta.frame_count = 42;
        meta.duration_formatted = Some("1m 5s".into());
        db.update_event_metadata(id, &meta).unwrap();

        let back = db.event_metadata(id).unwrap().unwrap();
        assert_eq!(back.frame_count, 42);
        assert_eq!(back.duration_formatted.as_deref(), Some("1m 5s"));
    }

    #[test]
    fn test_metadata_update_missing_event_fails() {
        let db = Database::open_in_memory().unwrap();
        let err = db.update_event_metadata(999, &EventMetadata::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_recent_events_and_stats() {
        let db = Database::open_in_memory().unwrap();
        for _ in 0..3 {
            db.add_event(&sample_event(None), now()).unwrap();
        }
        let mut unknown = sample_event(None);
        unknown.event_type = EventType::Unknown;
        db.add_event(&unknown, now()).unwrap();

        let recent = db.recent_events(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_type, "unknown");

        let stats = db.event_stats().unwrap();
        assert_eq!(stats[0].event_type, "regular_visit");
        assert_eq!(stats[0].count, 3);
        assert_eq!(db.event_count_today(now()).unwrap(), 4);
        assert_eq!(
            db.event_count_today(Utc.with_ymd_and_hms(2024, 5, 18, 0, 0, 0).unwrap())
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_customer_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let customer = db.add_customer("john", "John", Segment::New, now()).unwrap();
        assert_eq!(customer.total_visits, 0);

        db.record_visit(customer.id, now()).unwrap();
        db.set_customer_segment(customer.id, Segment::Vip).unwrap();

        let back = db.customer_by_face_id("john").unwrap().unwrap();
        assert_eq!(back.id, customer.id);
        assert_eq!(back.total_visits, 1);
        assert_eq!(back.segment, Segment::Vip);
        assert_eq!(back.last_visit_date, Some(now()));

        assert!(db.customer_by_face_id("nobody").unwrap().is_none());
        // face_id is unique
        assert!(db.add_customer("john", "John II", Segment::Regular, now()).is_err());
    }

    #[test]
    fn test_crop_insert() {
        let db = Database::open_in_memory().unwrap();
        let customer = db.add_customer("john", "John", Segment::Regular, now()).unwrap();
        let event_id = db.add_event(&sample_event(Some(customer.id)), now()).unwrap();
        let crop = NewCrop {
            image: CropImage {
                data: vec![0; 12],
                width: 2,
                height: 2,
            },
            customer_name: Some("John".into()),
            customer_id: Some(customer.id),
            event_id: Some(event_id),
            bbox: Bbox {
                xmin: 0.0,
                ymin: 0.0,
                xmax: 10.0,
                ymax: 10.0,
            },
            confidence: 88.0,
        };
        let id = db.add_crop("crops/2024-05-17/test.jpg", &crop, now()).unwrap();
        assert!(id > 0);
    }

    #[test]
    fn test_settings_defaults_and_overrides() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.detection_cooldown().unwrap(), DEFAULT_DETECTION_COOLDOWN_SECS);
        assert_eq!(db.revisit_threshold().unwrap(), DEFAULT_REVISIT_THRESHOLD);

        db.set_setting("detection_cooldown", "2.0").unwrap();
        assert_eq!(db.detection_cooldown().unwrap(), 2.0);
        db.set_setting("detection_cooldown", "not-a-number").unwrap();
        assert_eq!(db.detection_cooldown().unwrap(), DEFAULT_DETECTION_COOLDOWN_SECS);
    }
}
