//! Contract between the grid runner and an image-generation backend.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::params::ParamSet;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{0}")]
    Failed(String),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend returned an unreadable image: {0}")]
    InvalidOutput(String),
}

/// A single generation request for one cell.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub params: ParamSet,
    /// Caller-chosen tag identifying the request in backend logs.
    pub identity_tag: String,
    pub timeout: Duration,
}

/// Encoded image bytes plus their decoded size.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

impl GeneratedImage {
    /// Sniff the format and read the dimensions without a full decode.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, BackendError> {
        let reader = ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|e| BackendError::InvalidOutput(e.to_string()))?;
        let format = reader
            .format()
            .ok_or_else(|| BackendError::InvalidOutput("unknown image format".to_string()))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| BackendError::InvalidOutput(e.to_string()))?;
        Ok(Self {
            bytes,
            width,
            height,
            format,
        })
    }

    /// Encode an in-memory image.
    pub fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Self, BackendError> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), format)
            .map_err(|e| BackendError::InvalidOutput(e.to_string()))?;
        Ok(Self {
            bytes,
            width: image.width(),
            height: image.height(),
            format,
        })
    }

    pub fn decode(&self) -> Result<DynamicImage, BackendError> {
        image::load_from_memory_with_format(&self.bytes, self.format)
            .map_err(|e| BackendError::InvalidOutput(e.to_string()))
    }

    /// File extension matching the encoded format.
    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("bin")
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub image: GeneratedImage,
    /// Backend-provided generation metadata, usually JSON text.
    pub metadata: Option<String>,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Run one generation. Resolves exactly once, with the image or the
    /// reason it could not be produced.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, BackendError>;

    /// Requests currently waiting in the backend's own queue.
    fn queued_requests(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_then_sniff_dimensions() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(7, 3, Rgba([1, 2, 3, 255])));
        let encoded = GeneratedImage::encode(&img, ImageFormat::Png).unwrap();
        let sniffed = GeneratedImage::from_bytes(encoded.bytes.clone()).unwrap();
        assert_eq!((sniffed.width, sniffed.height), (7, 3));
        assert_eq!(sniffed.format, ImageFormat::Png);
        assert_eq!(sniffed.extension(), "png");
    }

    #[test]
    fn garbage_bytes_are_invalid_output() {
        let result = GeneratedImage::from_bytes(b"definitely not an image".to_vec());
        assert!(matches!(result, Err(BackendError::InvalidOutput(_))));
    }
}
