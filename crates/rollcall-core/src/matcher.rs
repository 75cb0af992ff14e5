//! Gallery matching behind a pluggable scoring function.
//!
//! A [`FaceScorer`] turns face samples into comparable [`Template`]s and
//! scores pairs of them; the [`Matcher`] scans a [`Gallery`] snapshot and
//! decides confidence against a threshold. Scorers declare their polarity
//! so distance metrics and similarity metrics share one matcher.

use crate::gallery::Gallery;
use crate::types::{FaceSample, MatchResult, Template};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("sample is empty ({width}x{height})")]
    EmptySample { width: u32, height: u32 },
    #[error("model file not found: {0}; download it from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Which direction of a score means "more alike".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Lower is more similar; confident iff `score < threshold`.
    Distance,
    /// Higher is more similar; confident iff `score >= threshold`.
    Similarity,
}

impl Polarity {
    pub fn passes(self, score: f32, threshold: f32) -> bool {
        match self {
            Polarity::Distance => score < threshold,
            Polarity::Similarity => score >= threshold,
        }
    }

    /// Strict improvement, so the first of two equal scores is kept.
    pub fn improves(self, candidate: f32, best: f32) -> bool {
        match self {
            Polarity::Distance => candidate < best,
            Polarity::Similarity => candidate > best,
        }
    }
}

/// Scoring function used by the [`Matcher`].
///
/// `template` must normalize samples of any size and channel layout to a
/// common representation, and `score` must be symmetric in its arguments.
pub trait FaceScorer: Send {
    /// Short name recorded on every template this scorer produces.
    fn name(&self) -> &str;

    fn polarity(&self) -> Polarity;

    /// Threshold used when none is configured.
    fn default_threshold(&self) -> f32;

    fn template(&mut self, sample: &FaceSample) -> Result<Template, ScorerError>;

    fn score(&self, probe: &Template, reference: &Template) -> f32;
}

/// Linear-scan matcher over a gallery snapshot.
pub struct Matcher {
    scorer: Box<dyn FaceScorer>,
    threshold: f32,
}

impl Matcher {
    /// Matcher using the scorer's default threshold.
    pub fn new(scorer: Box<dyn FaceScorer>) -> Self {
        let threshold = scorer.default_threshold();
        Self { scorer, threshold }
    }

    pub fn with_threshold(scorer: Box<dyn FaceScorer>, threshold: f32) -> Self {
        Self { scorer, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    pub fn scorer_mut(&mut self) -> &mut dyn FaceScorer {
        self.scorer.as_mut()
    }

    /// Match a probe sample against the gallery.
    ///
    /// A probe the scorer cannot template yields an unconfident result.
    pub fn identify(&mut self, probe: &FaceSample, gallery: &Gallery) -> MatchResult {
        match self.scorer.template(probe) {
            Ok(template) => self.compare(&template, gallery),
            Err(err) => {
                tracing::warn!(error = %err, "probe could not be templated; treating as unrecognized");
                MatchResult::no_match(None)
            }
        }
    }

    /// Compare a probe template against every gallery entry.
    ///
    /// Pure over its inputs. Ties keep the earliest entry.
    pub fn compare(&self, probe: &Template, gallery: &Gallery) -> MatchResult {
        let polarity = self.scorer.polarity();
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in gallery.entries().iter().enumerate() {
            let score = self.scorer.score(probe, &entry.template);
            if score.is_nan() {
                tracing::debug!(employee_id = %entry.identity.employee_id, "score is NaN; skipping candidate");
                continue;
            }
            let better = match best {
                None => true,
                Some((_, best_score)) => polarity.improves(score, best_score),
            };
            if better {
                best = Some((i, score));
            }
        }

        match best {
            Some((idx, score)) if polarity.passes(score, self.threshold) => {
                let identity = gallery.entries()[idx].identity.clone();
                tracing::debug!(employee_id = %identity.employee_id, score, "confident match");
                MatchResult {
                    identity: Some(identity),
                    score: Some(score),
                    is_confident: true,
                }
            }
            Some((_, score)) => MatchResult::no_match(Some(score)),
            None => MatchResult::no_match(None),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gallery::GalleryEntry;
    use crate::types::{Identity, SampleRef};

    /// Scores templates by absolute difference of their first value.
    pub(crate) struct FirstValueDistance;

    impl FaceScorer for FirstValueDistance {
        fn name(&self) -> &str {
            "first-value"
        }
        fn polarity(&self) -> Polarity {
            Polarity::Distance
        }
        fn default_threshold(&self) -> f32 {
            0.5
        }
        fn template(&mut self, sample: &FaceSample) -> Result<Template, ScorerError> {
            if sample.width() == 0 || sample.height() == 0 {
                return Err(ScorerError::EmptySample { width: sample.width(), height: sample.height() });
            }
            let luma = sample.to_luma8();
            Ok(Template { values: vec![luma.get_pixel(0, 0)[0] as f32 / 255.0], source: None })
        }
        fn score(&self, probe: &Template, reference: &Template) -> f32 {
            (probe.values[0] - reference.values[0]).abs()
        }
    }

    struct CosineSimilarity;

    impl FaceScorer for CosineSimilarity {
        fn name(&self) -> &str {
            "cosine"
        }
        fn polarity(&self) -> Polarity {
            Polarity::Similarity
        }
        fn default_threshold(&self) -> f32 {
            0.5
        }
        fn template(&mut self, _sample: &FaceSample) -> Result<Template, ScorerError> {
            Err(ScorerError::InferenceFailed("not used".into()))
        }
        fn score(&self, probe: &Template, reference: &Template) -> f32 {
            probe.similarity(reference)
        }
    }

    fn identity(id: &str) -> Identity {
        Identity {
            employee_id: id.into(),
            name: format!("name-{id}"),
            department: "Eng".into(),
            reference_sample: SampleRef(format!("{id}.png")),
        }
    }

    fn entry(id: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry { identity: identity(id), template: Template { values, source: None } }
    }

    fn t(values: Vec<f32>) -> Template {
        Template { values, source: None }
    }

    #[test]
    fn test_polarity_passes() {
        assert!(Polarity::Distance.passes(0.49, 0.5));
        assert!(!Polarity::Distance.passes(0.5, 0.5));
        assert!(Polarity::Similarity.passes(0.5, 0.5));
        assert!(!Polarity::Similarity.passes(0.49, 0.5));
    }

    #[test]
    fn test_polarity_improves_is_strict() {
        assert!(Polarity::Distance.improves(0.1, 0.2));
        assert!(!Polarity::Distance.improves(0.2, 0.2));
        assert!(Polarity::Similarity.improves(0.9, 0.8));
        assert!(!Polarity::Similarity.improves(0.8, 0.8));
    }

    #[test]
    fn test_compare_empty_gallery() {
        let matcher = Matcher::new(Box::new(FirstValueDistance));
        let result = matcher.compare(&t(vec![0.3]), &Gallery::default());
        assert!(!result.is_confident);
        assert!(result.identity.is_none());
        assert!(result.score.is_none());
    }

    #[test]
    fn test_compare_scans_entire_gallery() {
        let matcher = Matcher::new(Box::new(FirstValueDistance));
        let gallery = Gallery::from_entries(vec![
            entry("E1", vec![0.9]),
            entry("E2", vec![0.6]),
            entry("E3", vec![0.31]),
        ]);
        let result = matcher.compare(&t(vec![0.3]), &gallery);
        assert!(result.is_confident);
        assert_eq!(result.identity.unwrap().employee_id, "E3");
        assert!((result.score.unwrap() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_compare_tie_keeps_first() {
        let matcher = Matcher::new(Box::new(FirstValueDistance));
        let gallery = Gallery::from_entries(vec![
            entry("E1", vec![0.5]),
            entry("E2", vec![0.1]),
            entry("E3", vec![0.1]),
        ]);
        let result = matcher.compare(&t(vec![0.1]), &gallery);
        assert_eq!(result.identity.unwrap().employee_id, "E2");
    }

    #[test]
    fn test_compare_below_threshold_has_no_identity() {
        let matcher = Matcher::new(Box::new(FirstValueDistance));
        let gallery = Gallery::from_entries(vec![entry("E1", vec![0.9])]);
        let result = matcher.compare(&t(vec![0.1]), &gallery);
        assert!(!result.is_confident);
        assert!(result.identity.is_none());
        assert!((result.score.unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_compare_is_deterministic() {
        let matcher = Matcher::new(Box::new(FirstValueDistance));
        let gallery = Gallery::from_entries(vec![entry("E1", vec![0.4]), entry("E2", vec![0.2])]);
        let probe = t(vec![0.25]);
        assert_eq!(matcher.compare(&probe, &gallery), matcher.compare(&probe, &gallery));
    }

    #[test]
    fn test_compare_similarity_polarity() {
        let matcher = Matcher::new(Box::new(CosineSimilarity));
        let gallery = Gallery::from_entries(vec![
            entry("decoy", vec![0.0, 1.0, 0.0]),
            entry("match", vec![1.0, 0.0, 0.0]),
        ]);
        let result = matcher.compare(&t(vec![1.0, 0.0, 0.0]), &gallery);
        assert!(result.is_confident);
        assert_eq!(result.identity.unwrap().employee_id, "match");
        assert!((result.score.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_custom_threshold() {
        let matcher = Matcher::with_threshold(Box::new(FirstValueDistance), 0.05);
        let gallery = Gallery::from_entries(vec![entry("E1", vec![0.2])]);
        assert!(!matcher.compare(&t(vec![0.1]), &gallery).is_confident);
        assert!(matcher.compare(&t(vec![0.18]), &gallery).is_confident);
    }

    #[test]
    fn test_identify_untemplatable_probe() {
        let mut matcher = Matcher::new(Box::new(FirstValueDistance));
        let gallery = Gallery::from_entries(vec![entry("E1", vec![0.0])]);
        let result = matcher.identify(&FaceSample::new_luma8(0, 0), &gallery);
        assert!(!result.is_confident);
        assert!(result.score.is_none());
    }
}
