//! Face embedding extraction.
//!
//! [`EmbeddingExtractor`] turns a face chip into a fixed-length vector.
//! [`ArcFaceExtractor`] runs the w600k_r50 ArcFace model and yields
//! L2-normalized 512-dimensional embeddings.

use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// Different from SCRFD: ArcFace uses symmetric normalization.
const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
/// Width of the embeddings produced by [`ArcFaceExtractor`].
pub const ARCFACE_DIMENSION: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face chip has zero area")]
    EmptyChip,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A face embedding backend.
pub trait EmbeddingExtractor: Send {
    /// Length of every vector this backend produces.
    fn dimension(&self) -> usize;

    /// Embed one face chip. Chips of the wrong size are resized first.
    fn embed(&mut self, chip: &RgbImage) -> Result<Embedding, RecognizerError>;

    fn name(&self) -> &'static str;
}

/// ArcFace-based embedding extractor.
pub struct ArcFaceExtractor {
    session: Session,
}

impl ArcFaceExtractor {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Convert a chip into the ArcFace NCHW input tensor.
    fn preprocess(chip: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let resized;
        let chip = if chip.dimensions() == (size, size) {
            chip
        } else {
            resized = imageops::resize(chip, size, size, FilterType::Triangle);
            &resized
        };

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, px) in chip.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (px[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
        tensor
    }
}

impl EmbeddingExtractor for ArcFaceExtractor {
    fn dimension(&self) -> usize {
        ARCFACE_DIMENSION
    }

    fn embed(&mut self, chip: &RgbImage) -> Result<Embedding, RecognizerError> {
        if chip.width() == 0 || chip.height() == 0 {
            return Err(RecognizerError::EmptyChip);
        }

        let input = Self::preprocess(chip);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_DIMENSION {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_DIMENSION}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }

    fn name(&self) -> &'static str {
        "arcface"
    }
}

/// L2-normalize a raw vector. An all-zero vector is returned unchanged.
pub fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
