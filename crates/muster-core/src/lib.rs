//! muster-core: face detection, embedding, and matching engine.
//!
//! Uses SCRFD for face detection and ArcFace for embedding extraction, both
//! running via ONNX Runtime for CPU inference. Images arrive as base64
//! payloads and are decoded here; matching is cosine similarity over the
//! enrolled gallery.

use std::path::PathBuf;

pub mod alignment;
pub mod decode;
pub mod detector;
pub mod embedder;
pub mod types;

pub use decode::{EncodedImage, ImageDecodeError};
pub use types::{
    primary_face, CosineMatcher, Embedding, EnrolledFace, FaceBox, MatchResult, Matcher,
    DEFAULT_SIMILARITY_THRESHOLD, ZERO_NORM_SIMILARITY,
};

/// Default directory for ONNX model files when no override is configured:
/// `$XDG_DATA_HOME/muster/models`, falling back to `~/.local/share/muster/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("muster/models")
}
