use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    /// Only landmark-based detectors fill this in.
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Clip the box to a `width` x `height` frame. Landmarks are left as-is.
    ///
    /// A box lying entirely outside the frame clips to zero width or height.
    pub fn clip_to(&self, width: u32, height: u32) -> BoundingBox {
        let (fw, fh) = (width as f32, height as f32);
        let x1 = self.x.clamp(0.0, fw);
        let y1 = self.y.clamp(0.0, fh);
        let x2 = (self.x + self.width).clamp(0.0, fw);
        let y2 = (self.y + self.height).clamp(0.0, fh);
        BoundingBox {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
            confidence: self.confidence,
            landmarks: self.landmarks,
        }
    }
}

/// Primary key of a gym member in the membership store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub i64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// A member's stored embedding as read from the membership store.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledEmbedding {
    pub member_id: MemberId,
    pub values: Vec<f32>,
}

/// The slice of a member record the check-in core reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub id: MemberId,
    pub first_name: String,
    pub last_name: String,
    pub last_visit: Option<NaiveDate>,
}

impl Member {
    /// "First Last", or just the first name when no last name is on file.
    pub fn display_name(&self) -> String {
        let last = self.last_name.trim();
        if last.is_empty() {
            self.first_name.trim().to_string()
        } else {
            format!("{} {}", self.first_name.trim(), last)
        }
    }
}

/// Outcome of comparing a probe embedding against the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchDecision {
    pub matched: bool,
    pub member_id: Option<MemberId>,
    /// Distance to the nearest enrolled embedding.
    pub distance: f32,
    /// `1 - distance`, clamped to [0, 1]. Only meaningful when `matched`.
    pub confidence: f32,
}

impl MatchDecision {
    pub fn no_match(distance: f32) -> Self {
        Self {
            matched: false,
            member_id: None,
            distance,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    CheckIn,
    Class,
    PersonalTraining,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::CheckIn => "check-in",
            EventType::Class => "class",
            EventType::PersonalTraining => "personal-training",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "check-in" => Some(EventType::CheckIn),
            "class" => Some(EventType::Class),
            "personal-training" => Some(EventType::PersonalTraining),
            _ => None,
        }
    }
}

/// An attendance event ready to be written. Immutable once persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttendanceEvent {
    pub member: MemberId,
    pub event_type: EventType,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub confidence: f32,
    pub duration: String,
}

/// A persisted attendance event, serialized the way the activity API exposes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEvent {
    pub id: i64,
    pub member: MemberId,
    pub member_name: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub duration: String,
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_inside_frame_is_unchanged() {
        let b = BoundingBox {
            x: 10.0, y: 20.0, width: 30.0, height: 40.0,
            confidence: 0.9, landmarks: None,
        };
        assert_eq!(b.clip_to(100, 100), b);
    }

    #[test]
    fn test_clip_partially_outside() {
        let b = BoundingBox {
            x: -10.0, y: 90.0, width: 30.0, height: 40.0,
            confidence: 0.9, landmarks: None,
        };
        let c = b.clip_to(100, 100);
        assert_eq!((c.x, c.y, c.width, c.height), (0.0, 90.0, 20.0, 10.0));
    }

    #[test]
    fn test_clip_fully_outside_is_degenerate() {
        let b = BoundingBox {
            x: 150.0, y: 10.0, width: 30.0, height: 40.0,
            confidence: 0.9, landmarks: None,
        };
        assert_eq!(b.clip_to(100, 100).area(), 0.0);
    }

    #[test]
    fn test_display_name() {
        let mut m = Member {
            id: MemberId(1),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            last_visit: None,
        };
        assert_eq!(m.display_name(), "Ada Lovelace");
        m.last_name = String::new();
        assert_eq!(m.display_name(), "Ada");
    }

    #[test]
    fn test_event_type_roundtrip_strings() {
        for t in [EventType::CheckIn, EventType::Class, EventType::PersonalTraining] {
            assert_eq!(EventType::parse(t.as_str()), Some(t));
        }
        assert_eq!(
            serde_json::to_value(EventType::CheckIn).unwrap(),
            serde_json::json!("check-in")
        );
    }
}
