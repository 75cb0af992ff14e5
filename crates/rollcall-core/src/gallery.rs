//! Immutable gallery snapshot used by the matcher.

use crate::matcher::FaceScorer;
use crate::store::{GalleryStore, SampleStore, StoreError};
use crate::types::{Identity, Template};

/// One enrolled identity with its reference template.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity: Identity,
    pub template: Template,
}

/// Snapshot of the enrolled gallery, in enrollment order.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    /// Load every identity and template its reference sample.
    ///
    /// Identities whose sample cannot be loaded or templated are logged and
    /// left out; only a failure to list identities fails the whole load.
    pub fn load(
        identities: &dyn GalleryStore,
        samples: &dyn SampleStore,
        scorer: &mut dyn FaceScorer,
    ) -> Result<Self, StoreError> {
        let all = identities.identities()?;
        let total = all.len();
        let mut entries = Vec::with_capacity(total);

        for identity in all {
            let sample = match samples.load(&identity.reference_sample) {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(
                        employee_id = %identity.employee_id,
                        sample = %identity.reference_sample,
                        error = %err,
                        "reference sample failed to load; skipping"
                    );
                    continue;
                }
            };
            match scorer.template(&sample) {
                Ok(template) => entries.push(GalleryEntry { identity, template }),
                Err(err) => {
                    tracing::warn!(
                        employee_id = %identity.employee_id,
                        error = %err,
                        "reference sample could not be templated; skipping"
                    );
                }
            }
        }

        tracing::info!(
            loaded = entries.len(),
            skipped = total - entries.len(),
            scorer = scorer.name(),
            "gallery loaded"
        );

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::tests::FirstValueDistance;
    use crate::store::memory::{MemorySamples, MemoryStore};
    use crate::types::{FaceSample, SampleRef};

    fn gray(value: u8) -> FaceSample {
        FaceSample::ImageLuma8(image::GrayImage::from_pixel(4, 4, image::Luma([value])))
    }

    fn enroll(store: &MemoryStore, samples: &MemorySamples, id: &str, sample: &FaceSample) {
        let reference_sample = samples.save(id, sample).unwrap();
        store
            .insert_identity(&Identity {
                employee_id: id.into(),
                name: id.into(),
                department: "Eng".into(),
                reference_sample,
            })
            .unwrap();
    }

    #[test]
    fn test_load_empty() {
        let gallery = Gallery::load(&MemoryStore::new(), &MemorySamples::new(), &mut FirstValueDistance).unwrap();
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_load_preserves_enrollment_order() {
        let store = MemoryStore::new();
        let samples = MemorySamples::new();
        enroll(&store, &samples, "E1", &gray(10));
        enroll(&store, &samples, "E2", &gray(200));

        let gallery = Gallery::load(&store, &samples, &mut FirstValueDistance).unwrap();
        let ids: Vec<_> = gallery.entries().iter().map(|e| e.identity.employee_id.as_str()).collect();
        assert_eq!(ids, ["E1", "E2"]);
    }

    #[test]
    fn test_load_skips_unreadable_sample() {
        let store = MemoryStore::new();
        let samples = MemorySamples::new();
        enroll(&store, &samples, "E1", &gray(10));
        store
            .insert_identity(&Identity {
                employee_id: "BROKEN".into(),
                name: "Broken".into(),
                department: "Eng".into(),
                reference_sample: SampleRef("mem://missing".into()),
            })
            .unwrap();
        enroll(&store, &samples, "E3", &gray(30));

        let gallery = Gallery::load(&store, &samples, &mut FirstValueDistance).unwrap();
        assert_eq!(gallery.len(), 2);
        assert!(gallery.entries().iter().all(|e| e.identity.employee_id != "BROKEN"));
    }

    #[test]
    fn test_load_skips_untemplatable_sample() {
        let store = MemoryStore::new();
        let samples = MemorySamples::new();
        enroll(&store, &samples, "EMPTY", &FaceSample::new_luma8(0, 0));
        enroll(&store, &samples, "E2", &gray(30));

        let gallery = Gallery::load(&store, &samples, &mut FirstValueDistance).unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.entries()[0].identity.employee_id, "E2");
    }
}
