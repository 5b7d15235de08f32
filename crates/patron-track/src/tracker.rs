//! Visit session tracking.
//!
//! Each subject seen on camera owns at most one active session. A session
//! opens an event row when it starts, accumulates confidences while the
//! subject stays in view, and closes with a summary once the subject has
//! been absent longer than the session timeout. The tracker also decides
//! when a face crop is worth capturing, so storage is not flooded with a
//! crop per frame.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::model::{
    event_type_for_segment, format_duration, Bbox, CameraId, Customer, CustomerId, EventId,
    EventMetadata, EventType, Segment,
};
use crate::sink::{EventSink, NewEvent};

/// A subject is dropped from the active set after this much silence.
pub const SESSION_TIMEOUT_SECS: f64 = 10.0;
/// Grid pitch for binning unknown faces into stable spatial keys.
pub const UNKNOWN_GRID_CELL_PX: f32 = 50.0;
/// An unknown face moving farther than this forces a fresh crop.
pub const UNKNOWN_MOVEMENT_THRESHOLD_PX: f32 = 50.0;
/// Fallback crop interval for stationary unknown faces.
pub const UNKNOWN_CROP_INTERVAL_SECS: f64 = 10.0;
/// Metadata is flushed to the sink every N frames of a session.
pub const METADATA_FLUSH_INTERVAL_FRAMES: u64 = 10;
/// Only the most recent confidences are kept in flushed metadata.
pub const ROLLING_CONFIDENCE_WINDOW: usize = 50;

pub const DEFAULT_DETECTION_COOLDOWN_SECS: f64 = 5.0;

/// What the matcher decided about a face this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// Matched against the gallery; `face_id` is the gallery label.
    Known { face_id: String },
    Unknown,
}

/// Session identity. Known subjects key on their customer id; unknown
/// subjects key on a coarse spatial cell per camera, so a stationary
/// stranger maps to one session rather than one per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SessionKey {
    Customer(CustomerId),
    Unknown {
        cell_x: i64,
        cell_y: i64,
        camera: CameraId,
    },
}

impl SessionKey {
    fn for_subject(customer_id: Option<CustomerId>, bbox: &Bbox, camera: CameraId) -> SessionKey {
        match customer_id {
            Some(id) => SessionKey::Customer(id),
            None => SessionKey::Unknown {
                cell_x: (bbox.xmin / UNKNOWN_GRID_CELL_PX).floor() as i64,
                cell_y: (bbox.ymin / UNKNOWN_GRID_CELL_PX).floor() as i64,
                camera,
            },
        }
    }
}

#[derive(Debug)]
struct Session {
    event_id: EventId,
    entry_time: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    last_crop_time: DateTime<Utc>,
    last_bbox: Option<Bbox>,
    confidences: Vec<f32>,
    frame_count: u64,
}

/// Per-frame verdict handed back to the pipeline.
#[derive(Debug, Clone)]
pub struct Observation {
    pub event_id: EventId,
    pub event_type: EventType,
    pub customer_id: Option<CustomerId>,
    pub customer_name: Option<String>,
    pub segment: Option<Segment>,
    /// Whether the capture policy wants a crop saved for this frame.
    pub should_save_crop: bool,
    pub is_new_session: bool,
}

pub struct SessionTracker {
    sink: Arc<dyn EventSink>,
    active_sessions: HashMap<SessionKey, Session>,
    detection_cooldown_secs: f64,
    session_timeout_secs: f64,
}

fn secs_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

impl SessionTracker {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            active_sessions: HashMap::new(),
            detection_cooldown_secs: DEFAULT_DETECTION_COOLDOWN_SECS,
            session_timeout_secs: SESSION_TIMEOUT_SECS,
        }
    }

    /// Override the crop cooldown for recognized subjects.
    pub fn set_detection_cooldown(&mut self, seconds: f64) {
        self.detection_cooldown_secs = seconds;
    }

    pub fn active_session_count(&self) -> usize {
        self.active_sessions.len()
    }

    /// Feed one matched face from the current frame.
    ///
    /// Returns `None` when the subject could not be resolved against the
    /// sink or a fresh event row could not be created.
    pub fn observe(
        &mut self,
        subject: &Subject,
        confidence: f32,
        bbox: Bbox,
        camera_id: CameraId,
        now: DateTime<Utc>,
    ) -> Option<Observation> {
        let customer = match subject {
            Subject::Known { face_id } => match self.resolve_customer(face_id) {
                Some(c) => Some(c),
                None => return None,
            },
            Subject::Unknown => None,
        };

        let key = SessionKey::for_subject(customer.as_ref().map(|c| c.id), &bbox, camera_id);

        // A stale session for the same key is closed at its last sighting
        // before a new one opens.
        if let Some(session) = self.active_sessions.get(&key) {
            if secs_between(session.last_seen, now) > self.session_timeout_secs {
                self.close_session(key);
            }
        }

        let (event_type, face_id, segment) = match &customer {
            Some(c) => (
                event_type_for_segment(c.segment),
                Some(c.face_id.clone()),
                Some(c.segment),
            ),
            None => (EventType::Unknown, None, None),
        };

        if let Some(session) = self.active_sessions.get_mut(&key) {
            session.last_seen = now;
            session.confidences.push(confidence);
            session.frame_count += 1;

            let should_save_crop = match &customer {
                Some(_) => secs_between(session.last_crop_time, now) >= self.detection_cooldown_secs,
                None => {
                    // Movement outranks the time interval: a subject that
                    // jumped position is worth a fresh crop immediately.
                    let moved = match session.last_bbox {
                        Some(prev) => {
                            let (px, py) = prev.center();
                            let (cx, cy) = bbox.center();
                            ((cx - px).powi(2) + (cy - py).powi(2)).sqrt()
                                > UNKNOWN_MOVEMENT_THRESHOLD_PX
                        }
                        None => false,
                    };
                    moved
                        || secs_between(session.last_crop_time, now) >= UNKNOWN_CROP_INTERVAL_SECS
                }
            };
            session.last_bbox = Some(bbox);
            if should_save_crop {
                session.last_crop_time = now;
            }

            if session.frame_count % METADATA_FLUSH_INTERVAL_FRAMES == 0 {
                let event_id = session.event_id;
                let confidences = session.confidences.clone();
                let frame_count = session.frame_count;
                self.flush_metadata(event_id, &confidences, frame_count, now);
            }

            let session = &self.active_sessions[&key];
            return Some(Observation {
                event_id: session.event_id,
                event_type,
                customer_id: customer.as_ref().map(|c| c.id),
                customer_name: customer.as_ref().map(|c| c.name.clone()),
                segment,
                should_save_crop,
                is_new_session: false,
            });
        }

        // New session: open the event row up front so crops can reference it.
        let metadata = EventMetadata {
            bbox: Some(bbox),
            face_id: face_id.clone(),
            entry_time: Some(now),
            confidences: vec![confidence],
            frame_count: 1,
            last_seen: Some(now),
            ..Default::default()
        };
        let event = NewEvent {
            event_type,
            customer_id: customer.as_ref().map(|c| c.id),
            customer_name: customer.as_ref().map(|c| c.name.clone()),
            camera_id,
            confidence,
            metadata,
        };
        let event_id = match self.sink.create_event(event) {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "failed to create event, dropping observation");
                return None;
            }
        };
        debug!(
            event_id,
            event_type = %event_type,
            customer = customer.as_ref().map(|c| c.name.as_str()),
            "session started"
        );

        self.active_sessions.insert(
            key,
            Session {
                event_id,
                entry_time: now,
                last_seen: now,
                last_crop_time: now,
                last_bbox: Some(bbox),
                confidences: vec![confidence],
                frame_count: 1,
            },
        );

        Some(Observation {
            event_id,
            event_type,
            customer_id: customer.as_ref().map(|c| c.id),
            customer_name: customer.as_ref().map(|c| c.name.clone()),
            segment,
            should_save_crop: true,
            is_new_session: true,
        })
    }

    /// End every session whose subject has been absent past the timeout.
    pub fn check_timeouts(&mut self, now: DateTime<Utc>) {
        let expired: Vec<SessionKey> = self
            .active_sessions
            .iter()
            .filter(|(_, s)| secs_between(s.last_seen, now) > self.session_timeout_secs)
            .map(|(k, _)| *k)
            .collect();
        for key in expired {
            self.close_session(key);
        }
    }

    /// End every active session, e.g. on shutdown.
    pub fn flush_all(&mut self) {
        let keys: Vec<SessionKey> = self.active_sessions.keys().copied().collect();
        for key in keys {
            self.close_session(key);
        }
    }

    fn resolve_customer(&self, face_id: &str) -> Option<Customer> {
        match self.sink.customer_by_face_id(face_id) {
            Ok(Some(c)) => Some(c),
            Ok(None) => {
                // First sighting of a gallery label gets registered as a
                // new customer.
                match self.sink.add_customer(face_id, face_id, Segment::New) {
                    Ok(c) => {
                        debug!(face_id, customer_id = c.id, "registered new customer");
                        Some(c)
                    }
                    Err(err) => {
                        warn!(face_id, error = %err, "failed to register customer");
                        None
                    }
                }
            }
            Err(err) => {
                warn!(face_id, error = %err, "customer lookup failed");
                None
            }
        }
    }

    /// Periodic metadata write. Failures are logged and the session keeps
    /// running; metadata is best effort while the subject is in view.
    fn flush_metadata(
        &self,
        event_id: EventId,
        confidences: &[f32],
        frame_count: u64,
        now: DateTime<Utc>,
    ) {
        let mut meta = match self.sink.event_metadata(event_id) {
            Ok(Some(m)) => m,
            Ok(None) => EventMetadata::default(),
            Err(err) => {
                warn!(event_id, error = %err, "metadata fetch failed, skipping flush");
                return;
            }
        };
        // The average covers every confidence seen so far; only the stored
        // list is truncated to the rolling window.
        let window_start = confidences.len().saturating_sub(ROLLING_CONFIDENCE_WINDOW);
        meta.confidences = confidences[window_start..].to_vec();
        meta.confidence_avg = mean(confidences);
        meta.frame_count = frame_count;
        meta.last_seen = Some(now);
        if let Err(err) = self.sink.update_event_metadata(event_id, &meta) {
            warn!(event_id, error = %err, "metadata flush failed");
        }
    }

    fn close_session(&mut self, key: SessionKey) {
        let Some(session) = self.active_sessions.remove(&key) else {
            return;
        };
        let duration = secs_between(session.entry_time, session.last_seen);
        debug!(
            event_id = session.event_id,
            duration_secs = duration,
            frames = session.frame_count,
            "session ended"
        );

        let mut meta = match self.sink.event_metadata(session.event_id) {
            Ok(Some(m)) => m,
            Ok(None) => EventMetadata::default(),
            Err(err) => {
                warn!(event_id = session.event_id, error = %err, "metadata fetch failed at session end");
                EventMetadata::default()
            }
        };
        let window_start = session
            .confidences
            .len()
            .saturating_sub(ROLLING_CONFIDENCE_WINDOW);
        meta.confidences = session.confidences[window_start..].to_vec();
        meta.frame_count = session.frame_count;
        meta.last_seen = Some(session.last_seen);
        meta.exit_time = Some(session.last_seen);
        meta.duration_seconds = Some(duration);
        meta.duration_formatted = Some(format_duration(duration));
        meta.confidence_avg = mean(&session.confidences);
        meta.confidence_max = session
            .confidences
            .iter()
            .copied()
            .fold(None, |acc: Option<f32>, c| Some(acc.map_or(c, |a| a.max(c))));
        meta.confidence_min = session
            .confidences
            .iter()
            .copied()
            .fold(None, |acc: Option<f32>, c| Some(acc.map_or(c, |a| a.min(c))));
        meta.confidence_count = Some(session.confidences.len() as u64);

        if let Err(err) = self
            .sink
            .update_event_metadata(session.event_id, &meta)
        {
            warn!(event_id = session.event_id, error = %err, "failed to write session summary");
        }
    }
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{NewCrop, SinkError};
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockState {
        next_event_id: EventId,
        next_customer_id: CustomerId,
        events: Vec<NewEvent>,
        metadata: HashMap<EventId, EventMetadata>,
        customers: Vec<Customer>,
        fail_updates: bool,
    }

    #[derive(Default)]
    struct MockSink {
        state: Mutex<MockState>,
    }

    impl MockSink {
        fn with_customer(face_id: &str, name: &str, segment: Segment) -> Self {
            let sink = MockSink::default();
            {
                let mut st = sink.state.lock().unwrap();
                st.next_customer_id += 1;
                let id = st.next_customer_id;
                st.customers.push(Customer {
                    id,
                    face_id: face_id.into(),
                    name: name.into(),
                    segment,
                    total_visits: 0,
                    last_visit_date: None,
                    created_at: None,
                });
            }
            sink
        }

        fn failing_updates() -> Self {
            let sink = MockSink::default();
            sink.state.lock().unwrap().fail_updates = true;
            sink
        }

        fn metadata(&self, event_id: EventId) -> Option<EventMetadata> {
            self.state.lock().unwrap().metadata.get(&event_id).cloned()
        }

        fn event_count(&self) -> usize {
            self.state.lock().unwrap().events.len()
        }
    }

    impl EventSink for MockSink {
        fn create_event(&self, event: NewEvent) -> Result<EventId, SinkError> {
            let mut st = self.state.lock().unwrap();
            st.next_event_id += 1;
            let id = st.next_event_id;
            st.metadata.insert(id, event.metadata.clone());
            st.events.push(event);
            Ok(id)
        }

        fn event_metadata(&self, event_id: EventId) -> Result<Option<EventMetadata>, SinkError> {
            Ok(self.state.lock().unwrap().metadata.get(&event_id).cloned())
        }

        fn update_event_metadata(
            &self,
            event_id: EventId,
            metadata: &EventMetadata,
        ) -> Result<(), SinkError> {
            let mut st = self.state.lock().unwrap();
            if st.fail_updates {
                return Err(SinkError::Storage("update refused".into()));
            }
            st.metadata.insert(event_id, metadata.clone());
            Ok(())
        }

        fn save_crop(&self, _crop: NewCrop) -> Result<i64, SinkError> {
            Ok(1)
        }

        fn customer(&self, id: CustomerId) -> Result<Option<Customer>, SinkError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .customers
                .iter()
                .find(|c| c.id == id)
                .cloned())
        }

        fn customer_by_face_id(&self, face_id: &str) -> Result<Option<Customer>, SinkError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .customers
                .iter()
                .find(|c| c.face_id == face_id)
                .cloned())
        }

        fn add_customer(
            &self,
            face_id: &str,
            name: &str,
            segment: Segment,
        ) -> Result<Customer, SinkError> {
            let mut st = self.state.lock().unwrap();
            st.next_customer_id += 1;
            let customer = Customer {
                id: st.next_customer_id,
                face_id: face_id.into(),
                name: name.into(),
                segment,
                total_visits: 0,
                last_visit_date: None,
                created_at: None,
            };
            st.customers.push(customer.clone());
            Ok(customer)
        }
    }

    fn t(secs: f64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + (secs * 1000.0) as i64)
            .unwrap()
    }

    fn bbox(xmin: f32, ymin: f32) -> Bbox {
        Bbox {
            xmin,
            ymin,
            xmax: xmin + 80.0,
            ymax: ymin + 80.0,
        }
    }

    fn known(face_id: &str) -> Subject {
        Subject::Known {
            face_id: face_id.into(),
        }
    }

    #[test]
    fn test_continuous_run_is_one_event() {
        let sink = Arc::new(MockSink::with_customer("john", "John", Segment::Regular));
        let mut tracker = SessionTracker::new(sink.clone());

        let mut obs = Vec::new();
        for i in 0..20 {
            let o = tracker
                .observe(&known("john"), 90.0, bbox(100.0, 100.0), 1, t(i as f64 * 0.5))
                .unwrap();
            obs.push(o);
        }
        assert_eq!(sink.event_count(), 1);
        assert!(obs[0].is_new_session);
        assert!(obs[1..].iter().all(|o| !o.is_new_session));
        assert!(obs.iter().all(|o| o.event_id == obs[0].event_id));
        assert_eq!(tracker.active_session_count(), 1);
    }

    #[test]
    fn test_gap_past_timeout_opens_new_event() {
        let sink = Arc::new(MockSink::with_customer("john", "John", Segment::Regular));
        let mut tracker = SessionTracker::new(sink.clone());

        let first = tracker
            .observe(&known("john"), 90.0, bbox(100.0, 100.0), 1, t(0.0))
            .unwrap();
        let second = tracker
            .observe(&known("john"), 85.0, bbox(100.0, 100.0), 1, t(11.0))
            .unwrap();

        assert_ne!(first.event_id, second.event_id);
        assert!(second.is_new_session);
        assert_eq!(sink.event_count(), 2);

        // The first session closed at its last sighting, not at t=11.
        let meta = sink.metadata(first.event_id).unwrap();
        assert_eq!(meta.exit_time, Some(t(0.0)));
        assert_eq!(meta.duration_seconds, Some(0.0));
    }

    #[test]
    fn test_known_crop_cooldown() {
        let sink = Arc::new(MockSink::with_customer("john", "John", Segment::Regular));
        let mut tracker = SessionTracker::new(sink.clone());

        // 0.5s frames for 20s with the default 5s cooldown: one capture
        // every 5 seconds.
        let mut captures = Vec::new();
        for i in 0..=40 {
            let now = t(i as f64 * 0.5);
            let o = tracker
                .observe(&known("john"), 90.0, bbox(100.0, 100.0), 1, now)
                .unwrap();
            if o.should_save_crop {
                captures.push(i as f64 * 0.5);
            }
        }
        assert_eq!(captures, vec![0.0, 5.0, 10.0, 15.0, 20.0]);
    }

    #[test]
    fn test_unknown_movement_forces_crop() {
        let sink = Arc::new(MockSink::default());
        let mut tracker = SessionTracker::new(sink.clone());

        let start = bbox(100.0, 100.0);
        let first = tracker
            .observe(&Subject::Unknown, 0.0, start, 1, t(0.0))
            .unwrap();
        assert!(first.should_save_crop);
        assert_eq!(first.event_type, EventType::Unknown);

        // Still in the interval, no movement: no crop.
        let o = tracker
            .observe(&Subject::Unknown, 0.0, start, 1, t(5.0))
            .unwrap();
        assert!(!o.should_save_crop);

        // Center shifts 60px by widening the box; xmin/ymin stay in the
        // same grid cell so the session key is unchanged.
        let moved = Bbox {
            xmin: 100.0,
            ymin: 100.0,
            xmax: 300.0,
            ymax: 180.0,
        };
        let o = tracker
            .observe(&Subject::Unknown, 0.0, moved, 1, t(9.5))
            .unwrap();
        assert!(!o.is_new_session);
        assert!(o.should_save_crop);
        assert_eq!(sink.event_count(), 1);
    }

    #[test]
    fn test_unknown_interval_crop_when_stationary() {
        let sink = Arc::new(MockSink::default());
        let mut tracker = SessionTracker::new(sink.clone());

        tracker
            .observe(&Subject::Unknown, 0.0, bbox(100.0, 100.0), 1, t(0.0))
            .unwrap();
        let o = tracker
            .observe(&Subject::Unknown, 0.0, bbox(100.0, 100.0), 1, t(9.0))
            .unwrap();
        assert!(!o.should_save_crop);
        let o = tracker
            .observe(&Subject::Unknown, 0.0, bbox(100.0, 100.0), 1, t(10.0))
            .unwrap();
        assert!(o.should_save_crop);
    }

    #[test]
    fn test_segment_drives_event_type() {
        for (segment, expected) in [
            (Segment::Vip, EventType::VipDetected),
            (Segment::Blacklist, EventType::Blacklist),
            (Segment::New, EventType::NewCustomer),
            (Segment::Regular, EventType::RegularVisit),
        ] {
            let sink = Arc::new(MockSink::with_customer("jane", "Jane", segment));
            let mut tracker = SessionTracker::new(sink);
            let o = tracker
                .observe(&known("jane"), 95.0, bbox(0.0, 0.0), 1, t(0.0))
                .unwrap();
            assert_eq!(o.event_type, expected);
            assert_eq!(o.segment, Some(segment));
        }
    }

    #[test]
    fn test_unseen_face_auto_registers_as_new() {
        let sink = Arc::new(MockSink::default());
        let mut tracker = SessionTracker::new(sink.clone());

        let o = tracker
            .observe(&known("alice"), 88.0, bbox(0.0, 0.0), 1, t(0.0))
            .unwrap();
        assert_eq!(o.event_type, EventType::NewCustomer);
        assert_eq!(o.customer_name.as_deref(), Some("alice"));
        assert!(sink
            .customer_by_face_id("alice")
            .unwrap()
            .is_some_and(|c| c.segment == Segment::New));
    }

    #[test]
    fn test_timeout_sweep_closes_sessions() {
        let sink = Arc::new(MockSink::with_customer("john", "John", Segment::Regular));
        let mut tracker = SessionTracker::new(sink.clone());

        let event_id = tracker
            .observe(&known("john"), 90.0, bbox(0.0, 0.0), 1, t(0.0))
            .unwrap()
            .event_id;
        tracker.observe(&Subject::Unknown, 0.0, bbox(400.0, 400.0), 1, t(8.0));
        assert_eq!(tracker.active_session_count(), 2);

        // Only the known session has been silent past the timeout.
        tracker.check_timeouts(t(12.0));
        assert_eq!(tracker.active_session_count(), 1);
        let meta = sink.metadata(event_id).unwrap();
        assert!(meta.exit_time.is_some());
        assert!(meta.duration_formatted.is_some());
    }

    #[test]
    fn test_flush_all_closes_everything() {
        let sink = Arc::new(MockSink::with_customer("john", "John", Segment::Regular));
        let mut tracker = SessionTracker::new(sink.clone());

        let event_id = tracker
            .observe(&known("john"), 80.0, bbox(0.0, 0.0), 1, t(0.0))
            .unwrap()
            .event_id;
        tracker.observe(&known("john"), 90.0, bbox(0.0, 0.0), 1, t(2.0));
        tracker.observe(&known("john"), 100.0, bbox(0.0, 0.0), 1, t(4.0));
        tracker.flush_all();

        assert_eq!(tracker.active_session_count(), 0);
        let meta = sink.metadata(event_id).unwrap();
        assert_eq!(meta.confidence_avg, Some(90.0));
        assert_eq!(meta.confidence_max, Some(100.0));
        assert_eq!(meta.confidence_min, Some(80.0));
        assert_eq!(meta.confidence_count, Some(3));
        assert_eq!(meta.duration_seconds, Some(4.0));
        assert_eq!(meta.duration_formatted.as_deref(), Some("0m 4s"));
        assert_eq!(meta.exit_time, Some(t(4.0)));
    }

    #[test]
    fn test_periodic_flush_writes_metadata() {
        let sink = Arc::new(MockSink::with_customer("john", "John", Segment::Regular));
        let mut tracker = SessionTracker::new(sink.clone());

        let mut event_id = 0;
        for i in 0..10 {
            event_id = tracker
                .observe(&known("john"), 50.0 + i as f32, bbox(0.0, 0.0), 1, t(i as f64 * 0.5))
                .unwrap()
                .event_id;
        }
        let meta = sink.metadata(event_id).unwrap();
        assert_eq!(meta.frame_count, 10);
        assert_eq!(meta.confidences.len(), 10);
        assert_eq!(meta.last_seen, Some(t(4.5)));
        assert_eq!(meta.confidence_avg, Some(54.5));
    }

    #[test]
    fn test_flush_average_covers_full_history() {
        let sink = Arc::new(MockSink::with_customer("john", "John", Segment::Regular));
        let mut tracker = SessionTracker::new(sink.clone());

        let mut event_id = 0;
        for i in 0..60 {
            event_id = tracker
                .observe(&known("john"), i as f32, bbox(0.0, 0.0), 1, t(i as f64 * 0.1))
                .unwrap()
                .event_id;
        }
        let meta = sink.metadata(event_id).unwrap();
        // Stored list truncates to the window; the average does not.
        assert_eq!(meta.confidences.len(), 50);
        assert_eq!(meta.confidences[0], 10.0);
        assert_eq!(meta.confidence_avg, Some(29.5));
    }

    #[test]
    fn test_flush_failure_keeps_session_alive() {
        let sink = Arc::new(MockSink::failing_updates());
        let mut tracker = SessionTracker::new(sink.clone());

        for i in 0..15 {
            let o = tracker
                .observe(&Subject::Unknown, 0.0, bbox(0.0, 0.0), 1, t(i as f64 * 0.5))
                .unwrap();
            assert_eq!(o.event_id, 1);
        }
        assert_eq!(tracker.active_session_count(), 1);
        // Closing also fails to persist but still drops the session.
        tracker.flush_all();
        assert_eq!(tracker.active_session_count(), 0);
    }

    #[test]
    fn test_unknown_sessions_separate_by_camera() {
        let sink = Arc::new(MockSink::default());
        let mut tracker = SessionTracker::new(sink.clone());

        let a = tracker
            .observe(&Subject::Unknown, 0.0, bbox(100.0, 100.0), 1, t(0.0))
            .unwrap();
        let b = tracker
            .observe(&Subject::Unknown, 0.0, bbox(100.0, 100.0), 2, t(0.0))
            .unwrap();
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(tracker.active_session_count(), 2);
    }
}
