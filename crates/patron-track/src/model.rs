//! Data model shared by the tracker and the persistence sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type CustomerId = i64;
pub type EventId = i64;
pub type CropId = i64;
pub type CameraId = i64;

pub const METADATA_SCHEMA_VERSION: u32 = 1;

/// Customer segment; the only classification signal the tracker consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    #[default]
    Regular,
    Vip,
    New,
    Blacklist,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Regular => "regular",
            Segment::Vip => "vip",
            Segment::New => "new",
            Segment::Blacklist => "blacklist",
        }
    }

    /// Parse a stored segment string; unrecognized values fall back to regular.
    pub fn parse(s: &str) -> Segment {
        match s {
            "vip" => Segment::Vip,
            "new" => Segment::New,
            "blacklist" => Segment::Blacklist,
            _ => Segment::Regular,
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Recognized,
    Unknown,
    VipDetected,
    Blacklist,
    NewCustomer,
    RegularVisit,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Recognized => "recognized",
            EventType::Unknown => "unknown",
            EventType::VipDetected => "vip_detected",
            EventType::Blacklist => "blacklist",
            EventType::NewCustomer => "new_customer",
            EventType::RegularVisit => "regular_visit",
        }
    }

    pub fn parse(s: &str) -> Option<EventType> {
        Some(match s {
            "recognized" => EventType::Recognized,
            "unknown" => EventType::Unknown,
            "vip_detected" => EventType::VipDetected,
            "blacklist" => EventType::Blacklist,
            "new_customer" => EventType::NewCustomer,
            "regular_visit" => EventType::RegularVisit,
            _ => return None,
        })
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event type for a recognized customer, keyed off their segment.
/// Unknown subjects always map to [`EventType::Unknown`] regardless.
pub fn event_type_for_segment(segment: Segment) -> EventType {
    match segment {
        Segment::Vip => EventType::VipDetected,
        Segment::New => EventType::NewCustomer,
        Segment::Blacklist => EventType::Blacklist,
        Segment::Regular => EventType::RegularVisit,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    /// Gallery label reference, e.g. `john`.
    pub face_id: String,
    pub name: String,
    pub segment: Segment,
    pub total_visits: i64,
    pub last_visit_date: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Customer {
    pub fn is_vip(&self) -> bool {
        self.segment == Segment::Vip
    }

    pub fn is_blacklist(&self) -> bool {
        self.segment == Segment::Blacklist
    }
}

/// Face bounding box in frame coordinates, corner form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Bbox {
    pub fn center(&self) -> (f32, f32) {
        ((self.xmin + self.xmax) * 0.5, (self.ymin + self.ymax) * 0.5)
    }
}

/// A face crop as raw interleaved RGB8 pixels, handed to the sink for
/// encoding and storage.
#[derive(Debug, Clone)]
pub struct CropImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl CropImage {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }
}

/// Structured event metadata, written at session start and progressively
/// enriched until the closing summary. Stable schema so stored events
/// round-trip; `version` guards future shape changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default = "schema_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Bbox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_time: Option<DateTime<Utc>>,
    /// Rolling window of recent confidences (last 50 on periodic flushes).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confidences: Vec<f32>,
    #[serde(default)]
    pub frame_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_avg: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_max: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_formatted: Option<String>,
}

fn schema_version() -> u32 {
    METADATA_SCHEMA_VERSION
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            version: METADATA_SCHEMA_VERSION,
            bbox: None,
            face_id: None,
            entry_time: None,
            confidences: Vec::new(),
            frame_count: 0,
            confidence_avg: None,
            confidence_max: None,
            confidence_min: None,
            confidence_count: None,
            last_seen: None,
            exit_time: None,
            duration_seconds: None,
            duration_formatted: None,
        }
    }
}

/// `"<min>m <sec>s"` from whole seconds.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}m {}s", total / 60, total % 60)
}
