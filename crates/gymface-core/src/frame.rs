//! Decoded RGB frames.

use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("empty image payload")]
    Empty,
    #[error("undecodable image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has zero size")]
    ZeroSize,
}

/// A decoded frame: height × width × 3 interleaved RGB bytes.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Decode an encoded image (JPEG, PNG, WebP, ...) into an RGB frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        let decoded = image::load_from_memory(bytes)?;
        Self::from_rgb(decoded.to_rgb8())
    }

    pub fn from_rgb(image: RgbImage) -> Result<Self, FrameError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(FrameError::ZeroSize);
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Raw interleaved RGB bytes, row-major.
    pub fn data(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}
