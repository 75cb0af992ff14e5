use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// A face image as handed between collaborators: a full camera frame, a
/// cropped face region, or a decoded reference sample.
pub type FaceSample = image::DynamicImage;

/// Timestamp format used for attendance events and their storage.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rectangular face region in frame pixel coordinates, clamped to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector confidence in [0, 1]; 1.0 for regions that did not come from a model.
    pub confidence: f32,
}

impl FaceRegion {
    /// Clamp a floating-point box to a `frame_width` × `frame_height` frame.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn clamped(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        confidence: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        let x0 = x.max(0.0).floor() as u32;
        let y0 = y.max(0.0).floor() as u32;
        let x1 = ((x + width).ceil().max(0.0) as u32).min(frame_width);
        let y1 = ((y + height).ceil().max(0.0) as u32).min(frame_height);

        if x0 >= x1 || y0 >= y1 {
            return None;
        }

        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
            confidence,
        })
    }

    /// Cut this region out of `frame`.
    pub fn crop(&self, frame: &FaceSample) -> FaceSample {
        frame.crop_imm(self.x, self.y, self.width, self.height)
    }
}

/// Opaque handle to a stored reference sample (a path for the filesystem store).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleRef(pub String);

impl SampleRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SampleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub employee_id: String,
    pub name: String,
    pub department: String,
    pub reference_sample: SampleRef,
}

/// One accepted sign-in. Identity fields are copied at match time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub employee_id: String,
    pub name: String,
    pub department: String,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub matched_sample: SampleRef,
}

impl AttendanceEvent {
    /// Build an event for `identity` at `now`, truncated to whole seconds.
    pub fn for_identity(identity: &Identity, now: NaiveDateTime) -> Self {
        Self {
            employee_id: identity.employee_id.clone(),
            name: identity.name.clone(),
            department: identity.department.clone(),
            timestamp: truncate_to_seconds(now),
            matched_sample: identity.reference_sample.clone(),
        }
    }
}

/// Drop sub-second precision from a timestamp.
pub fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Comparable face representation produced by a scorer (intensity histogram,
/// embedding vector, ...). Only templates from the same scorer are comparable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub values: Vec<f32>,
    /// Scorer that produced this template (e.g., "histogram", "w600k_r50").
    pub source: Option<String>,
}

impl Template {
    /// Compute cosine similarity between two templates.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Template) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// Result of matching one probe against a gallery. Transient.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Best candidate, present only for a confident match.
    pub identity: Option<Identity>,
    /// Score of the best candidate seen, if any candidate was scored.
    pub score: Option<f32>,
    pub is_confident: bool,
}

impl MatchResult {
    pub fn no_match(score: Option<f32>) -> Self {
        Self {
            identity: None,
            score,
            is_confident: false,
        }
    }
}

mod timestamp_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}
