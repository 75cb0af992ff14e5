//! Intensity-histogram scorer.
//!
//! Both samples are reduced to single-channel luma at a fixed resolution,
//! summarized as an L1-normalized 256-bin histogram, and compared with the
//! Bhattacharyya distance (0 = identical, 1 = disjoint).

use crate::matcher::{FaceScorer, Polarity, ScorerError};
use crate::types::{FaceSample, Template};
use image::imageops::FilterType;

const HISTOGRAM_BINS: usize = 256;
const NORMALIZED_SIZE: u32 = 100;
const HISTOGRAM_THRESHOLD: f32 = 0.5;
const HISTOGRAM_SOURCE: &str = "histogram";

#[derive(Debug, Default, Clone, Copy)]
pub struct HistogramScorer;

impl HistogramScorer {
    /// L1-normalized luma histogram of `sample` at the common resolution.
    pub fn histogram(sample: &FaceSample) -> Result<Vec<f32>, ScorerError> {
        if sample.width() == 0 || sample.height() == 0 {
            return Err(ScorerError::EmptySample {
                width: sample.width(),
                height: sample.height(),
            });
        }

        let gray = sample
            .grayscale()
            .resize_exact(NORMALIZED_SIZE, NORMALIZED_SIZE, FilterType::Triangle)
            .to_luma8();

        let mut hist = vec![0f32; HISTOGRAM_BINS];
        for pixel in gray.pixels() {
            hist[pixel[0] as usize] += 1.0;
        }

        let total: f32 = hist.iter().sum();
        for bin in hist.iter_mut() {
            *bin /= total;
        }
        Ok(hist)
    }
}

/// Bhattacharyya distance between two histograms.
///
/// Histograms need not be normalized; the coefficient is scaled by their means.
pub fn bhattacharyya_distance(h1: &[f32], h2: &[f32]) -> f32 {
    let n = h1.len().min(h2.len());
    if n == 0 {
        return 1.0;
    }

    let sum1: f64 = h1[..n].iter().map(|&v| v as f64).sum();
    let sum2: f64 = h2[..n].iter().map(|&v| v as f64).sum();
    let denom = (sum1 * sum2).sqrt();
    if denom <= 0.0 {
        return 1.0;
    }

    let coefficient: f64 = h1[..n]
        .iter()
        .zip(&h2[..n])
        .map(|(&a, &b)| (a as f64 * b as f64).sqrt())
        .sum();

    (1.0 - coefficient / denom).max(0.0).sqrt() as f32
}

impl FaceScorer for HistogramScorer {
    fn name(&self) -> &str {
        HISTOGRAM_SOURCE
    }

    fn polarity(&self) -> Polarity {
        Polarity::Distance
    }

    fn default_threshold(&self) -> f32 {
        HISTOGRAM_THRESHOLD
    }

    fn template(&mut self, sample: &FaceSample) -> Result<Template, ScorerError> {
        Ok(Template {
            values: Self::histogram(sample)?,
            source: Some(HISTOGRAM_SOURCE.to_string()),
        })
    }

    fn score(&self, probe: &Template, reference: &Template) -> f32 {
        bhattacharyya_distance(&probe.values, &reference.values)
    }
}
