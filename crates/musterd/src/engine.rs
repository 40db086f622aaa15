//! The inference engine thread.
//!
//! Both ONNX models are loaded once at daemon startup (fail-fast) and owned
//! by one dedicated OS thread; request handlers talk to it over an mpsc
//! channel and await oneshot replies. Dropping every [`EngineHandle`] closes
//! the channel and the thread exits, unloading the models.

use image::RgbImage;
use muster_core::detector::{DetectorError, FaceDetector};
use muster_core::embedder::{EmbedderError, FaceEmbedder};
use muster_core::{primary_face, Embedding};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Detection count plus the embedding of the primary (largest-area) face.
pub struct Extraction {
    pub face_count: usize,
    /// `None` when no face was found, or the chip/embedding could not be
    /// computed from the primary detection.
    pub embedding: Option<Embedding>,
}

/// Messages sent from request handlers to the engine thread.
pub(crate) enum EngineRequest {
    CountFaces {
        image: RgbImage,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Extract {
        image: RgbImage,
        reply: oneshot::Sender<Result<Extraction, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub(crate) fn from_sender(tx: mpsc::Sender<EngineRequest>) -> Self {
        Self { tx }
    }

    /// Count faces in one decoded image.
    pub async fn count_faces(&self, image: RgbImage) -> Result<usize, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::CountFaces {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Detect faces and embed the primary one.
    pub async fn extract(&self, image: RgbImage) -> Result<Extraction, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously, then enters the request loop.
/// Fails fast at startup if either model file is unavailable.
pub fn spawn(scrfd_path: &str, arcface_path: &str) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(scrfd_path)?;
    tracing::info!(path = scrfd_path, "SCRFD detector loaded");

    let mut embedder = FaceEmbedder::load(arcface_path)?;
    tracing::info!(path = arcface_path, "ArcFace embedder loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("muster-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::CountFaces { image, reply } => {
                        let result = detector
                            .detect(&image)
                            .map(|faces| faces.len())
                            .map_err(Into::into);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Extract { image, reply } => {
                        let _ = reply.send(run_extract(&mut detector, &mut embedder, &image));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

fn run_extract(
    detector: &mut FaceDetector,
    embedder: &mut FaceEmbedder,
    image: &RgbImage,
) -> Result<Extraction, EngineError> {
    let faces = detector.detect(image)?;
    let face_count = faces.len();

    let embedding = match primary_face(&faces) {
        Some(face) => embedder.extract(image, face)?,
        None => None,
    };

    tracing::debug!(face_count, embedded = embedding.is_some(), "extraction done");
    Ok(Extraction {
        face_count,
        embedding,
    })
}
