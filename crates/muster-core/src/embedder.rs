//! ArcFace face embedder via ONNX Runtime.
//!
//! Extracts 512-dimensional embeddings from aligned face chips, using the
//! w600k_r50 ArcFace model.

use crate::alignment;
use crate::types::{Embedding, FaceBox};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0: ArcFace uses symmetric normalization

/// Embedding dimensionality produced by the w600k_r50 model.
pub const EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} (expected an ArcFace .onnx under the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face embedder.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract an embedding for one detected face.
    ///
    /// Faces with landmarks are aligned to the canonical 112x112 chip; a
    /// detection without landmarks falls back to a plain box crop. Returns
    /// `Ok(None)` when no usable chip or embedding can be produced from the
    /// detection, which callers report as a failed computation rather than
    /// an internal error.
    pub fn extract(
        &mut self,
        img: &RgbImage,
        face: &FaceBox,
    ) -> Result<Option<Embedding>, EmbedderError> {
        let chip = match face.landmarks.as_ref() {
            Some(landmarks) => alignment::align_face(img, landmarks),
            None => match alignment::crop_face(img, face) {
                Some(chip) => chip,
                None => {
                    tracing::debug!(?face.x, ?face.y, "detection box yields no usable chip");
                    return Ok(None);
                }
            },
        };

        let input = preprocess(&chip);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // A zero-norm output cannot be normalized; treat as not computable.
        Ok(Embedding::from_raw(raw))
    }
}

/// Preprocess a 112x112 RGB chip into a NCHW float tensor.
fn preprocess(chip: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let rgb = chip
                .get_pixel_checked(x as u32, y as u32)
                .map(|p| p.0)
                .unwrap_or([0, 0, 0]);

            for c in 0..3 {
                tensor[[0, c, y, x]] = (rgb[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn preprocess_output_shape() {
        let chip = RgbImage::from_pixel(112, 112, Rgb([128, 128, 128]));
        let tensor = preprocess(&chip);
        assert_eq!(tensor.shape(), &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]);
    }

    #[test]
    fn preprocess_normalization() {
        let chip = RgbImage::from_pixel(112, 112, Rgb([128, 128, 128]));
        let tensor = preprocess(&chip);
        // (128 - 127.5) / 127.5
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        let val = tensor[[0, 0, 0, 0]];
        assert!((val - expected).abs() < 1e-6, "got {val}, expected {expected}");
    }

    #[test]
    fn preprocess_keeps_channels_separate() {
        let chip = RgbImage::from_pixel(112, 112, Rgb([255, 0, 64]));
        let tensor = preprocess(&chip);
        assert!((tensor[[0, 0, 50, 50]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 50, 50]] + 1.0).abs() < 1e-6);
        let expected_b = (64.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 2, 50, 50]] - expected_b).abs() < 1e-6);
    }

    #[test]
    fn preprocess_extremes_map_to_unit_range() {
        let chip = RgbImage::from_pixel(112, 112, Rgb([0, 255, 0]));
        let tensor = preprocess(&chip);
        assert!((tensor[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] - 1.0).abs() < 1e-6);
    }
}
