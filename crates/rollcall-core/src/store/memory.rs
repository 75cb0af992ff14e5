//! In-process stores: used by tests and the daemon's ephemeral mode.

use super::{apply_limit, AttendanceLog, EventQuery, GalleryStore, SampleStore, StoreError};
use crate::types::{AttendanceEvent, FaceSample, Identity, SampleRef};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Gallery store and attendance log held in memory.
#[derive(Default)]
pub struct MemoryStore {
    identities: Mutex<Vec<Identity>>,
    events: Mutex<Vec<AttendanceEvent>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".into()));
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("store mutex poisoned".into())
}

impl GalleryStore for MemoryStore {
    fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut identities = self.identities.lock().map_err(poisoned)?;
        if identities.iter().any(|i| i.employee_id == identity.employee_id) {
            return Err(StoreError::Duplicate(identity.employee_id.clone()));
        }
        identities.push(identity.clone());
        Ok(())
    }

    fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(self.identities.lock().map_err(poisoned)?.clone())
    }

    fn identity(&self, employee_id: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .identities
            .lock()
            .map_err(poisoned)?
            .iter()
            .find(|i| i.employee_id == employee_id)
            .cloned())
    }
}

impl AttendanceLog for MemoryStore {
    fn append(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
        self.check_writable()?;
        self.events.lock().map_err(poisoned)?.push(event.clone());
        Ok(())
    }

    fn events(&self, query: &EventQuery) -> Result<Vec<AttendanceEvent>, StoreError> {
        let matching = self
            .events
            .lock()
            .map_err(poisoned)?
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        Ok(apply_limit(matching, query.limit))
    }
}

/// Reference samples held in memory, keyed by generated `mem://` handles.
#[derive(Default)]
pub struct MemorySamples {
    samples: Mutex<HashMap<SampleRef, FaceSample>>,
    next_id: AtomicU64,
}

impl MemorySamples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SampleStore for MemorySamples {
    fn save(&self, employee_id: &str, sample: &FaceSample) -> Result<SampleRef, StoreError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let sample_ref = SampleRef(format!("mem://{employee_id}/{n}"));
        self.samples
            .lock()
            .map_err(poisoned)?
            .insert(sample_ref.clone(), sample.clone());
        Ok(sample_ref)
    }

    fn load(&self, sample: &SampleRef) -> Result<FaceSample, StoreError> {
        self.samples
            .lock()
            .map_err(poisoned)?
            .get(sample)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(sample.to_string()))
    }

    fn discard(&self, sample: &SampleRef) -> Result<(), StoreError> {
        self.samples.lock().map_err(poisoned)?.remove(sample);
        Ok(())
    }
}
