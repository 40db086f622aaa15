//! Inbound image payload decoding.
//!
//! Camera captures arrive from the web layer as base64 strings, sometimes
//! wrapped in a `data:image/...;base64,` URI. [`EncodedImage`] resolves both
//! shapes into one canonical type at the boundary; everything downstream
//! works on decoded [`RgbImage`] rasters.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageDecodeError {
    #[error("empty image payload")]
    EmptyPayload,
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not parseable image data: {0}")]
    Unparseable(#[from] image::ImageError),
}

/// A base64-encoded image payload with any data-URI prefix already stripped.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    b64: String,
}

impl EncodedImage {
    /// Canonicalize an inbound payload string.
    ///
    /// Everything up to and including the first comma is treated as a
    /// data-URI header and discarded; surrounding whitespace is trimmed.
    pub fn from_payload(payload: &str) -> Self {
        let b64 = match payload.split_once(',') {
            Some((_header, rest)) => rest,
            None => payload,
        };
        Self {
            b64: b64.trim().to_string(),
        }
    }

    /// Decode to the raw encoded file bytes (JPEG/PNG as sent), without
    /// rasterizing. Used when persisting the reference capture verbatim.
    pub fn file_bytes(&self) -> Result<Vec<u8>, ImageDecodeError> {
        if self.b64.is_empty() {
            return Err(ImageDecodeError::EmptyPayload);
        }
        Ok(BASE64.decode(self.b64.as_bytes())?)
    }

    /// Decode to a canonical 8-bit RGB raster.
    pub fn decode(&self) -> Result<RgbImage, ImageDecodeError> {
        let bytes = self.file_bytes()?;
        let img = image::load_from_memory(&bytes)?;
        Ok(img.to_rgb8())
    }
}
