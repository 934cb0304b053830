//! Image → probe embedding: decode, detect, pick a face, chip, embed.

use crate::alignment;
use crate::detector::{FaceDetector, ScrfdDetector};
use crate::error::CheckinError;
use crate::frame::Frame;
use crate::recognizer::{ArcFaceExtractor, EmbeddingExtractor};
use crate::types::{BoundingBox, Embedding};
use std::path::Path;

/// Result of running the pipeline on one image.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe {
    NoFace,
    Face {
        face: BoundingBox,
        embedding: Embedding,
    },
}

/// Owns the detector and extractor for the life of the process.
pub struct FacePipeline {
    detector: Box<dyn FaceDetector>,
    extractor: Box<dyn EmbeddingExtractor>,
}

impl FacePipeline {
    pub fn new(detector: Box<dyn FaceDetector>, extractor: Box<dyn EmbeddingExtractor>) -> Self {
        Self {
            detector,
            extractor,
        }
    }

    /// Load the SCRFD detector and ArcFace extractor.
    pub fn load(detector_model: &Path, recognizer_model: &Path) -> Result<Self, CheckinError> {
        let detector = ScrfdDetector::load(detector_model)?;
        let extractor = ArcFaceExtractor::load(recognizer_model).map_err(CheckinError::Recognizer)?;
        Ok(Self::new(Box::new(detector), Box::new(extractor)))
    }

    /// Embedding dimension produced by the extractor.
    pub fn dimension(&self) -> usize {
        self.extractor.dimension()
    }

    pub fn backends(&self) -> (&'static str, &'static str) {
        (self.detector.name(), self.extractor.name())
    }

    /// Decode `image` and run [`probe_frame`](Self::probe_frame).
    pub fn probe(&mut self, image: &[u8]) -> Result<Probe, CheckinError> {
        let frame = Frame::decode(image)?;
        self.probe_frame(&frame)
    }

    /// Detect faces and embed the first one the detector returns.
    pub fn probe_frame(&mut self, frame: &Frame) -> Result<Probe, CheckinError> {
        let mut detections = self.detector.detect(frame)?;
        let Some(face) = detections.next() else {
            tracing::debug!(width = frame.width(), height = frame.height(), "no face detected");
            return Ok(Probe::NoFace);
        };

        let clipped = face.clip_to(frame.width(), frame.height());
        if clipped.width < 1.0 || clipped.height < 1.0 {
            return Err(CheckinError::FaceTooSmall {
                width: clipped.width,
                height: clipped.height,
            });
        }

        let chip = alignment::face_chip(frame, &face).ok_or(CheckinError::FaceTooSmall {
            width: clipped.width,
            height: clipped.height,
        })?;
        let embedding = self.extractor.embed(&chip)?;

        if embedding.dimension() != self.extractor.dimension() {
            return Err(CheckinError::EmbeddingFailure(format!(
                "extractor returned {} dimensions, expected {}",
                embedding.dimension(),
                self.extractor.dimension()
            )));
        }

        tracing::debug!(
            confidence = face.confidence,
            x = face.x,
            y = face.y,
            width = face.width,
            height = face.height,
            "face embedded"
        );
        Ok(Probe::Face { face, embedding })
    }
}
