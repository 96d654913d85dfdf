//! Caller-visible error taxonomy.
//!
//! Every component reports its own error enum; the `From` impls below are the
//! single place where those are classified. Anything that does not map onto a
//! specific kind becomes [`VerifyError::Verification`].

use crate::decoder::{DecodeError, RasterizeError};
use crate::detector::DetectorError;
use crate::extractor::ExtractError;
use crate::matcher::MatchError;
use crate::ocr::OcrError;
use crate::recognizer::RecognizerError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("input is empty")]
    EmptyInput,
    #[error("unsupported file type: {0}; upload a JPEG, PNG or PDF")]
    UnsupportedFormat(String),
    #[error("failed to decode {kind}: {reason}")]
    Decode { kind: &'static str, reason: String },
    #[error("no face found in the provided image")]
    FaceNotFound,
    #[error("multiple faces detected ({0}); only one allowed")]
    MultipleFaces(usize),
    #[error("embeddings cannot be compared: {0}")]
    DegenerateEmbedding(String),
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("text recognition failed: {0}")]
    Ocr(String),
    #[error("reference store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("verification failed: {0}")]
    Verification(String),
}

/// Coarse status class attached to every [`VerifyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// The input itself is unusable.
    BadRequest,
    /// The input decoded but its content cannot be verified.
    Unprocessable,
    Internal,
}

impl StatusClass {
    pub fn status_code(self) -> u16 {
        match self {
            StatusClass::BadRequest => 400,
            StatusClass::Unprocessable => 422,
            StatusClass::Internal => 500,
        }
    }
}

impl VerifyError {
    pub fn status_class(&self) -> StatusClass {
        match self {
            VerifyError::EmptyInput
            | VerifyError::UnsupportedFormat(_)
            | VerifyError::Decode { .. } => StatusClass::BadRequest,
            VerifyError::FaceNotFound | VerifyError::MultipleFaces(_) => {
                StatusClass::Unprocessable
            }
            VerifyError::DegenerateEmbedding(_)
            | VerifyError::Detection(_)
            | VerifyError::Ocr(_)
            | VerifyError::StoreUnavailable(_)
            | VerifyError::Verification(_) => StatusClass::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_class().status_code()
    }

    /// Stable machine-readable name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyError::EmptyInput => "empty_input",
            VerifyError::UnsupportedFormat(_) => "unsupported_format",
            VerifyError::Decode { .. } => "decode",
            VerifyError::FaceNotFound => "face_not_found",
            VerifyError::MultipleFaces(_) => "multiple_faces",
            VerifyError::DegenerateEmbedding(_) => "degenerate_embedding",
            VerifyError::Detection(_) => "detection",
            VerifyError::Ocr(_) => "ocr",
            VerifyError::StoreUnavailable(_) => "store_unavailable",
            VerifyError::Verification(_) => "verification",
        }
    }

    /// Message safe to hand to a caller. Unclassified failures hide their detail.
    pub fn public_message(&self) -> String {
        match self {
            VerifyError::Verification(_) => "internal error during verification".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<DecodeError> for VerifyError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Empty => VerifyError::EmptyInput,
            DecodeError::Unsupported(what) => VerifyError::UnsupportedFormat(what),
            DecodeError::Image { format, source } => VerifyError::Decode {
                kind: format,
                reason: source.to_string(),
            },
            DecodeError::Rasterize(RasterizeError::Rejected(reason)) => VerifyError::Decode {
                kind: "pdf",
                reason,
            },
            DecodeError::Rasterize(other) => VerifyError::Verification(other.to_string()),
        }
    }
}

impl From<DetectorError> for VerifyError {
    fn from(err: DetectorError) -> Self {
        VerifyError::Detection(err.to_string())
    }
}

impl From<RecognizerError> for VerifyError {
    fn from(err: RecognizerError) -> Self {
        match err {
            RecognizerError::NoLandmarks => VerifyError::Verification(err.to_string()),
            other => VerifyError::Detection(format!("embedding extraction: {other}")),
        }
    }
}

impl From<ExtractError> for VerifyError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::NoFace => VerifyError::FaceNotFound,
            ExtractError::MultipleFaces(count) => VerifyError::MultipleFaces(count),
            ExtractError::Detector(e) => e.into(),
            ExtractError::Recognizer(e) => e.into(),
        }
    }
}

impl From<MatchError> for VerifyError {
    fn from(err: MatchError) -> Self {
        VerifyError::DegenerateEmbedding(err.to_string())
    }
}

impl From<OcrError> for VerifyError {
    fn from(err: OcrError) -> Self {
        VerifyError::Ocr(err.to_string())
    }
}

impl From<StoreError> for VerifyError {
    fn from(err: StoreError) -> Self {
        VerifyError::StoreUnavailable(err.to_string())
    }
}
