//! Embedding oracle interface.
//!
//! Face detection and embedding extraction happen outside Porter. The
//! oracle is handed a full RGB image and returns every face it finds,
//! each with its location and embedding. Zero faces is a normal answer.

use crate::types::DetectedFace;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("embedding service unreachable: {0}")]
    Unavailable(String),
    #[error("embedding service protocol error: {0}")]
    Protocol(String),
    #[error("embedding service reported: {0}")]
    Remote(String),
}

/// Detects faces and computes their embeddings.
///
/// Implementations must be callable from several threads: the access
/// engine and operator resolution both use the same oracle.
pub trait EmbeddingOracle: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, OracleError>;
}
