//! rollcall-core: Face-identified attendance engine.
//!
//! Locates faces in camera frames, matches them against an enrolled
//! gallery through a pluggable scorer, and records debounced attendance
//! events. Enrollment turns one captured frame into a new identity.

pub mod controller;
pub mod detector;
pub mod enrollment;
pub mod gallery;
pub mod histogram;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;
pub mod store;
pub mod types;

pub use controller::{AttendanceController, Cooldown, CooldownScope, Outcome, State};
pub use detector::{FaceLocator, ScrfdLocator};
pub use enrollment::{enroll, EnrollError, EnrollRequest};
pub use gallery::{Gallery, GalleryEntry};
pub use histogram::HistogramScorer;
pub use matcher::{FaceScorer, Matcher, Polarity, ScorerError};
pub use pipeline::{DetectionPipeline, Tick};
pub use recognizer::EmbeddingScorer;
pub use store::{AttendanceLog, EventQuery, GalleryStore, SampleStore, StoreError};
pub use types::{AttendanceEvent, FaceRegion, FaceSample, Identity, MatchResult, SampleRef, Template};

/// Default directory holding the ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/rollcall/models")
}
