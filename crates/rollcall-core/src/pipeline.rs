//! Per-tick detection pipeline: frame → faces → matches → attendance.

use crate::controller::{AttendanceController, Outcome, State};
use crate::detector::FaceLocator;
use crate::gallery::Gallery;
use crate::matcher::Matcher;
use crate::store::AttendanceLog;
use crate::types::FaceSample;
use chrono::NaiveDateTime;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

const REGION_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const REGION_THICKNESS: u32 = 2;

/// Result of one processed frame.
#[derive(Debug, Clone)]
pub struct Tick {
    /// Frame for display, with detected regions outlined.
    pub annotated: RgbImage,
    pub outcomes: Vec<Outcome>,
}

pub struct DetectionPipeline<D: FaceLocator, L: AttendanceLog> {
    locator: D,
    matcher: Matcher,
    controller: AttendanceController<L>,
    gallery: Gallery,
}

impl<D: FaceLocator, L: AttendanceLog> DetectionPipeline<D, L> {
    pub fn new(locator: D, matcher: Matcher, controller: AttendanceController<L>, gallery: Gallery) -> Self {
        Self {
            locator,
            matcher,
            controller,
            gallery,
        }
    }

    pub fn start(&mut self) {
        self.controller.start();
    }

    pub fn stop(&mut self) {
        self.controller.stop();
    }

    pub fn state(&self) -> State {
        self.controller.state()
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Replace the gallery snapshot used from the next frame on.
    pub fn set_gallery(&mut self, gallery: Gallery) {
        self.gallery = gallery;
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn controller(&self) -> &AttendanceController<L> {
        &self.controller
    }

    /// Locator and matcher together, for enrollment and gallery reloads.
    pub fn parts_mut(&mut self) -> (&mut D, &mut Matcher) {
        (&mut self.locator, &mut self.matcher)
    }

    /// Process one frame.
    ///
    /// An absent frame is a no-op and yields `None`. While idle the frame is
    /// passed through for display without detection. While detecting, each
    /// located face is cropped, matched and handed to the controller in
    /// detection order.
    pub fn on_frame(&mut self, frame: Option<&FaceSample>, now: NaiveDateTime) -> Option<Tick> {
        let frame = frame?;
        let mut annotated = frame.to_rgb8();

        if !self.controller.is_detecting() {
            return Some(Tick {
                annotated,
                outcomes: Vec::new(),
            });
        }

        let regions = match self.locator.locate(frame) {
            Ok(regions) => regions,
            Err(err) => {
                tracing::warn!(error = %err, "face location failed; skipping frame");
                Vec::new()
            }
        };

        let mut outcomes = Vec::with_capacity(regions.len());
        for region in &regions {
            outline(&mut annotated, region.x, region.y, region.width, region.height);

            let crop = region.crop(frame);
            let result = self.matcher.identify(&crop, &self.gallery);
            outcomes.push(self.controller.handle(&result, now));
        }

        if !regions.is_empty() {
            tracing::debug!(faces = regions.len(), "frame processed");
        }

        Some(Tick { annotated, outcomes })
    }
}

fn outline(img: &mut RgbImage, x: u32, y: u32, width: u32, height: u32) {
    for inset in 0..REGION_THICKNESS {
        let (w, h) = (width.saturating_sub(2 * inset), height.saturating_sub(2 * inset));
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((x + inset) as i32, (y + inset) as i32).of_size(w, h);
        draw_hollow_rect_mut(img, rect, REGION_COLOR);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::controller::{Cooldown, CooldownScope};
    use crate::detector::DetectorError;
    use crate::gallery::GalleryEntry;
    use crate::histogram::HistogramScorer;
    use crate::matcher::FaceScorer;
    use crate::store::memory::MemoryStore;
    use crate::store::EventQuery;
    use crate::types::{FaceRegion, Identity, SampleRef};
    use chrono::{Duration, NaiveDate};
    use image::{GrayImage, Luma};
    use std::sync::Arc;

    /// Returns a fixed list of regions for every frame.
    pub(crate) struct FixedLocator(pub Vec<FaceRegion>);

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, _frame: &FaceSample) -> Result<Vec<FaceRegion>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingLocator;

    impl FaceLocator for FailingLocator {
        fn locate(&mut self, _frame: &FaceSample) -> Result<Vec<FaceRegion>, DetectorError> {
            Err(DetectorError::InferenceFailed("boom".into()))
        }
    }

    pub(crate) fn region(x: u32, y: u32, w: u32, h: u32) -> FaceRegion {
        FaceRegion { x, y, width: w, height: h, confidence: 0.9 }
    }

    /// Face-like patch: dark background with a bright vertical bar.
    pub(crate) fn face_a() -> FaceSample {
        FaceSample::ImageLuma8(GrayImage::from_fn(40, 40, |x, _| {
            if (15..25).contains(&x) { Luma([220]) } else { Luma([30]) }
        }))
    }

    /// Frame with `face_a` pasted at (10, 10) on a mid-gray background.
    fn frame_with_face_a() -> FaceSample {
        let mut frame = GrayImage::from_pixel(100, 80, Luma([128]));
        image::imageops::replace(&mut frame, &face_a().to_luma8(), 10, 10);
        FaceSample::ImageLuma8(frame)
    }

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn gallery_of(samples: &[(&str, FaceSample)]) -> Gallery {
        let mut scorer = HistogramScorer;
        Gallery::from_entries(
            samples
                .iter()
                .map(|(id, sample)| GalleryEntry {
                    identity: Identity {
                        employee_id: id.to_string(),
                        name: "Alice".into(),
                        department: "Eng".into(),
                        reference_sample: SampleRef(format!("{id}.png")),
                    },
                    template: scorer.template(sample).unwrap(),
                })
                .collect(),
        )
    }

    fn pipeline<D: FaceLocator>(
        locator: D,
        gallery: Gallery,
        scope: CooldownScope,
    ) -> (DetectionPipeline<D, Arc<MemoryStore>>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let controller = AttendanceController::new(store.clone(), Cooldown::new(scope, Duration::seconds(60)));
        let matcher = Matcher::new(Box::new(HistogramScorer));
        (DetectionPipeline::new(locator, matcher, controller, gallery), store)
    }

    fn logged(store: &MemoryStore) -> Vec<String> {
        store
            .events(&EventQuery::default())
            .unwrap()
            .into_iter()
            .map(|e| e.employee_id)
            .collect()
    }

    #[test]
    fn test_absent_frame_is_noop() {
        let (mut p, store) = pipeline(FixedLocator(vec![region(10, 10, 40, 40)]), gallery_of(&[("E1", face_a())]), CooldownScope::PerIdentity);
        p.start();
        assert!(p.on_frame(None, t0()).is_none());
        assert!(logged(&store).is_empty());
    }

    #[test]
    fn test_idle_passes_frame_through() {
        let (mut p, store) = pipeline(FixedLocator(vec![region(10, 10, 40, 40)]), gallery_of(&[("E1", face_a())]), CooldownScope::PerIdentity);
        let frame = frame_with_face_a();
        let tick = p.on_frame(Some(&frame), t0()).unwrap();
        assert!(tick.outcomes.is_empty());
        assert_eq!(tick.annotated, frame.to_rgb8());
        assert!(logged(&store).is_empty());
    }

    #[test]
    fn test_enrolled_face_recorded_then_debounced() {
        let (mut p, store) = pipeline(FixedLocator(vec![region(10, 10, 40, 40)]), gallery_of(&[("E1", face_a())]), CooldownScope::PerIdentity);
        p.start();
        let frame = frame_with_face_a();

        let tick = p.on_frame(Some(&frame), t0()).unwrap();
        assert!(matches!(&tick.outcomes[..], [Outcome::Recorded(e)] if e.employee_id == "E1"));

        let tick = p.on_frame(Some(&frame), t0() + Duration::seconds(1)).unwrap();
        assert!(matches!(&tick.outcomes[..], [Outcome::Debounced { .. }]));

        p.on_frame(Some(&frame), t0() + Duration::seconds(61)).unwrap();
        assert_eq!(logged(&store), ["E1", "E1"]);
    }

    #[test]
    fn test_empty_gallery_records_nothing() {
        let (mut p, store) = pipeline(FixedLocator(vec![region(10, 10, 40, 40)]), Gallery::default(), CooldownScope::PerIdentity);
        p.start();
        let tick = p.on_frame(Some(&frame_with_face_a()), t0()).unwrap();
        assert_eq!(tick.outcomes, vec![Outcome::NotRecognized { score: None }]);
        assert!(logged(&store).is_empty());
    }

    #[test]
    fn test_no_faces_is_not_an_error() {
        let (mut p, store) = pipeline(FixedLocator(vec![]), gallery_of(&[("E1", face_a())]), CooldownScope::PerIdentity);
        p.start();
        let tick = p.on_frame(Some(&frame_with_face_a()), t0()).unwrap();
        assert!(tick.outcomes.is_empty());
        assert!(logged(&store).is_empty());
    }

    #[test]
    fn test_locator_failure_skips_frame() {
        let (mut p, store) = pipeline(FailingLocator, gallery_of(&[("E1", face_a())]), CooldownScope::PerIdentity);
        p.start();
        let tick = p.on_frame(Some(&frame_with_face_a()), t0()).unwrap();
        assert!(tick.outcomes.is_empty());
        assert!(logged(&store).is_empty());
    }

    #[test]
    fn test_each_region_is_an_independent_attempt() {
        // Same face located twice in one frame: the second is debounced.
        let regions = vec![region(10, 10, 40, 40), region(10, 10, 40, 40), region(60, 20, 30, 30)];
        let (mut p, store) = pipeline(FixedLocator(regions), gallery_of(&[("E1", face_a())]), CooldownScope::PerIdentity);
        p.start();
        let tick = p.on_frame(Some(&frame_with_face_a()), t0()).unwrap();
        assert_eq!(tick.outcomes.len(), 3);
        assert!(matches!(tick.outcomes[0], Outcome::Recorded(_)));
        assert!(matches!(tick.outcomes[1], Outcome::Debounced { .. }));
        assert!(matches!(tick.outcomes[2], Outcome::NotRecognized { .. }));
        assert_eq!(logged(&store), ["E1"]);
    }

    #[test]
    fn test_stop_takes_effect_on_next_frame() {
        let (mut p, store) = pipeline(FixedLocator(vec![region(10, 10, 40, 40)]), gallery_of(&[("E1", face_a())]), CooldownScope::PerIdentity);
        p.start();
        p.stop();
        let tick = p.on_frame(Some(&frame_with_face_a()), t0()).unwrap();
        assert!(tick.outcomes.is_empty());
        assert!(logged(&store).is_empty());
    }

    #[test]
    fn test_set_gallery_applies_to_next_frame() {
        let (mut p, store) = pipeline(FixedLocator(vec![region(10, 10, 40, 40)]), Gallery::default(), CooldownScope::PerIdentity);
        p.start();
        p.on_frame(Some(&frame_with_face_a()), t0());
        p.set_gallery(gallery_of(&[("E1", face_a())]));
        p.on_frame(Some(&frame_with_face_a()), t0() + Duration::seconds(1));
        assert_eq!(logged(&store), ["E1"]);
    }

    #[test]
    fn test_detected_region_is_outlined() {
        let (mut p, _) = pipeline(FixedLocator(vec![region(10, 10, 40, 40)]), Gallery::default(), CooldownScope::PerIdentity);
        p.start();
        let tick = p.on_frame(Some(&frame_with_face_a()), t0()).unwrap();
        assert_eq!(*tick.annotated.get_pixel(10, 10), REGION_COLOR);
        assert_eq!(*tick.annotated.get_pixel(11, 30), REGION_COLOR);
        assert_ne!(*tick.annotated.get_pixel(30, 30), REGION_COLOR);
    }
}
