//! ArcFace embedding scorer via ONNX Runtime.
//!
//! Produces 512-dimensional L2-normalized embeddings from face crops with
//! the w600k_r50 ArcFace model and compares them by cosine similarity.

use crate::matcher::{FaceScorer, Polarity, ScorerError};
use crate::types::{FaceSample, Template};
use image::imageops::FilterType;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";
const ARCFACE_THRESHOLD: f32 = 0.40;

/// ArcFace-based scorer. Crops are resized to the model input directly.
pub struct EmbeddingScorer {
    session: Session,
}

impl EmbeddingScorer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ScorerError> {
        if !Path::new(model_path).exists() {
            return Err(ScorerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Resize a face crop to the 112x112 luma NCHW tensor ArcFace expects.
    fn preprocess(sample: &FaceSample) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as u32;
        let face = image::imageops::resize(&sample.to_luma8(), size, size, FilterType::Triangle);

        Array4::from_shape_fn((1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE), |(_, _, y, x)| {
            (face.get_pixel(x as u32, y as u32)[0] as f32 - ARCFACE_MEAN) / ARCFACE_STD
        })
    }
}

/// Scale `values` to unit length; zero vectors are returned unchanged.
fn l2_normalize(values: Vec<f32>) -> Vec<f32> {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter().map(|x| x / norm).collect()
    } else {
        values
    }
}

impl FaceScorer for EmbeddingScorer {
    fn name(&self) -> &str {
        ARCFACE_MODEL_VERSION
    }

    fn polarity(&self) -> Polarity {
        Polarity::Similarity
    }

    fn default_threshold(&self) -> f32 {
        ARCFACE_THRESHOLD
    }

    fn template(&mut self, sample: &FaceSample) -> Result<Template, ScorerError> {
        if sample.width() == 0 || sample.height() == 0 {
            return Err(ScorerError::EmptySample {
                width: sample.width(),
                height: sample.height(),
            });
        }

        let input = Self::preprocess(sample);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ScorerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(ScorerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Template {
            values: l2_normalize(raw.to_vec()),
            source: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }

    fn score(&self, probe: &Template, reference: &Template) -> f32 {
        probe.similarity(reference)
    }
}
