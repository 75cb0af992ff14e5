//! Storage contracts consumed by the core.
//!
//! The gallery store and attendance log are durable keyed tables; the
//! sample store holds reference-face artifacts. Implementations live in
//! `rollcall-store` (SQLite + filesystem) and [`memory`] (tests, ephemeral
//! daemon mode).

use crate::types::{AttendanceEvent, FaceSample, Identity, SampleRef};
use chrono::NaiveDateTime;
use thiserror::Error;

pub mod memory;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("employee id already enrolled: {0}")]
    Duplicate(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage backend: {0}")]
    Backend(String),
    #[error("sample codec: {0}")]
    Codec(String),
}

/// Enrolled identities. Append-only; `employee_id` is unique.
pub trait GalleryStore {
    /// Insert a new identity, failing with [`StoreError::Duplicate`] if the id exists.
    fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError>;

    /// All identities in enrollment order.
    fn identities(&self) -> Result<Vec<Identity>, StoreError>;

    fn identity(&self, employee_id: &str) -> Result<Option<Identity>, StoreError>;
}

/// Filter for reading back attendance events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    pub employee_id: Option<String>,
    /// Only events at or after this time.
    pub since: Option<NaiveDateTime>,
    /// Keep only the most recent `limit` matching events.
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn matches(&self, event: &AttendanceEvent) -> bool {
        let id_ok = self
            .employee_id
            .as_deref()
            .map_or(true, |id| id == event.employee_id);
        let since_ok = self.since.map_or(true, |since| event.timestamp >= since);
        id_ok && since_ok
    }
}

/// Append-only ledger of accepted sign-ins.
pub trait AttendanceLog {
    fn append(&self, event: &AttendanceEvent) -> Result<(), StoreError>;

    /// Matching events in insertion order.
    fn events(&self, query: &EventQuery) -> Result<Vec<AttendanceEvent>, StoreError>;
}

/// Reference-sample artifacts.
pub trait SampleStore {
    /// Durably store a new artifact for `employee_id`. Never overwrites an existing artifact.
    fn save(&self, employee_id: &str, sample: &FaceSample) -> Result<SampleRef, StoreError>;

    fn load(&self, sample: &SampleRef) -> Result<FaceSample, StoreError>;

    /// Remove an artifact that no identity references.
    fn discard(&self, sample: &SampleRef) -> Result<(), StoreError>;
}

impl<T: AttendanceLog + ?Sized> AttendanceLog for std::sync::Arc<T> {
    fn append(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
        (**self).append(event)
    }
    fn events(&self, query: &EventQuery) -> Result<Vec<AttendanceEvent>, StoreError> {
        (**self).events(query)
    }
}

impl<T: GalleryStore + ?Sized> GalleryStore for std::sync::Arc<T> {
    fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        (**self).insert_identity(identity)
    }
    fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        (**self).identities()
    }
    fn identity(&self, employee_id: &str) -> Result<Option<Identity>, StoreError> {
        (**self).identity(employee_id)
    }
}

/// Keep the last `limit` events of an insertion-ordered list.
pub fn apply_limit(mut events: Vec<AttendanceEvent>, limit: Option<usize>) -> Vec<AttendanceEvent> {
    if let Some(limit) = limit {
        if events.len() > limit {
            events.drain(..events.len() - limit);
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn event(id: &str, hour: u32) -> AttendanceEvent {
        AttendanceEvent {
            employee_id: id.into(),
            name: id.into(),
            department: "Eng".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap().and_hms_opt(hour, 0, 0).unwrap(),
            matched_sample: SampleRef(format!("{id}.png")),
        }
    }

    #[test]
    fn test_query_default_matches_everything() {
        assert!(EventQuery::default().matches(&event("E1", 8)));
    }

    #[test]
    fn test_query_filters_employee_and_since() {
        let query = EventQuery {
            employee_id: Some("E1".into()),
            since: Some(NaiveDate::from_ymd_opt(2024, 5, 6).unwrap().and_hms_opt(9, 0, 0).unwrap()),
            limit: None,
        };
        assert!(!query.matches(&event("E1", 8)));
        assert!(query.matches(&event("E1", 9)));
        assert!(!query.matches(&event("E2", 10)));
    }

    #[test]
    fn test_apply_limit_keeps_most_recent() {
        let events = vec![event("E1", 8), event("E2", 9), event("E3", 10)];
        let kept = apply_limit(events, Some(2));
        let ids: Vec<_> = kept.iter().map(|e| e.employee_id.as_str()).collect();
        assert_eq!(ids, ["E2", "E3"]);
        assert_eq!(apply_limit(vec![event("E1", 8)], Some(5)).len(), 1);
    }
}
