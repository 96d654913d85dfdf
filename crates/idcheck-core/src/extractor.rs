//! Single-face embedding extraction with face selection policy.

use crate::decoder::Bitmap;
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face found in image")]
    NoFace,
    #[error("multiple faces detected ({0}); only one allowed")]
    MultipleFaces(usize),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

/// How a face is chosen when a bitmap must yield exactly one embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaceSelection {
    /// Exactly one face must be present.
    #[default]
    Single,
    /// The face with the largest box wins; ties go to the first discovered.
    Largest,
}

impl FaceSelection {
    /// Name accepted by `FromStr`.
    pub fn as_str(self) -> &'static str {
        match self {
            FaceSelection::Single => "single",
            FaceSelection::Largest => "largest",
        }
    }
}

impl std::str::FromStr for FaceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(FaceSelection::Single),
            "largest" => Ok(FaceSelection::Largest),
            other => Err(format!("unknown face selection '{other}' (expected single|largest)")),
        }
    }
}

/// Pairs a detector with a recognizer. Embeddings from one extractor are
/// always produced by the same recognizer and so are mutually comparable.
#[derive(Clone)]
pub struct EmbeddingExtractor {
    detector: Arc<dyn FaceDetector>,
    recognizer: Arc<dyn FaceRecognizer>,
}

impl EmbeddingExtractor {
    pub fn new(detector: Arc<dyn FaceDetector>, recognizer: Arc<dyn FaceRecognizer>) -> Self {
        Self {
            detector,
            recognizer,
        }
    }

    pub fn detector(&self) -> &dyn FaceDetector {
        self.detector.as_ref()
    }

    /// Embedding of the only face in the bitmap.
    pub fn extract_single(&self, bitmap: &Bitmap) -> Result<Embedding, ExtractError> {
        self.extract(bitmap, FaceSelection::Single)
    }

    /// Embedding of the dominant (largest) face in the bitmap.
    pub fn extract_largest(&self, bitmap: &Bitmap) -> Result<Embedding, ExtractError> {
        self.extract(bitmap, FaceSelection::Largest)
    }

    pub fn extract(
        &self,
        bitmap: &Bitmap,
        selection: FaceSelection,
    ) -> Result<Embedding, ExtractError> {
        let faces = self.detector.detect(bitmap)?;
        let face = select_face(&faces, selection)?;
        tracing::debug!(
            ?selection,
            faces = faces.len(),
            confidence = face.confidence,
            "face selected for embedding"
        );
        Ok(self.recognizer.embed(bitmap, face)?)
    }
}

/// Apply the selection policy to detector output.
pub fn select_face(
    faces: &[BoundingBox],
    selection: FaceSelection,
) -> Result<&BoundingBox, ExtractError> {
    match (selection, faces) {
        (_, []) => Err(ExtractError::NoFace),
        (FaceSelection::Single, [only]) => Ok(only),
        (FaceSelection::Single, many) => Err(ExtractError::MultipleFaces(many.len())),
        (FaceSelection::Largest, [first, rest @ ..]) => Ok(rest
            .iter()
            .fold(first, |best, face| if face.area() > best.area() { face } else { best })),
    }
}
