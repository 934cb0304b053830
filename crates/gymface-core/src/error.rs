use crate::detector::DetectorError;
use crate::frame::FrameError;
use crate::matcher::MatchError;
use crate::recognizer::RecognizerError;
use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Everything a recognition or enrollment request can fail with.
#[derive(Error, Debug)]
pub enum CheckinError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] FrameError),
    #[error("face region too small to embed ({width:.1}x{height:.1} px)")]
    FaceTooSmall { width: f32, height: f32 },
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),
    #[error("no members with face data found")]
    EmptyGallery,
    #[error("store failure: {0}")]
    StoreFailure(#[from] StoreError),
    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(RecognizerError),
    #[error("recognition engine is not running")]
    EngineUnavailable,
}

impl From<MatchError> for CheckinError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::EmptyGallery => CheckinError::EmptyGallery,
            other @ MatchError::DimensionMismatch { .. } => {
                CheckinError::EmbeddingFailure(other.to_string())
            }
        }
    }
}

impl From<RecognizerError> for CheckinError {
    fn from(err: RecognizerError) -> Self {
        match err {
            RecognizerError::EmptyChip => CheckinError::EmbeddingFailure(err.to_string()),
            other => CheckinError::Recognizer(other),
        }
    }
}
