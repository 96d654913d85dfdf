//! idcheck-core: identity verification pipeline.
//!
//! Decodes live frames and identity documents, detects faces with SCRFD,
//! embeds them with ArcFace (both via ONNX Runtime), matches embeddings by
//! cosine similarity and summarizes document text through OCR.

pub mod alignment;
pub mod config;
pub mod decoder;
pub mod detector;
pub mod error;
pub mod extractor;
pub mod matcher;
pub mod ocr;
pub mod pipeline;
pub mod recognizer;
pub mod store;
pub mod types;

pub use config::{LoadError, Settings};
pub use decoder::{Bitmap, InputKind, PageRasterizer, PopplerRasterizer};
pub use detector::{FaceDetector, ScrfdDetector};
pub use error::{StatusClass, VerifyError};
pub use extractor::{EmbeddingExtractor, FaceSelection};
pub use matcher::{StorePolicy, DEFAULT_THRESHOLD};
pub use ocr::{TesseractRecognizer, TextFragment, TextRecognizer};
pub use pipeline::{
    DocumentMatchReport, FaceDetectionReport, Providers, StoreMatchReport, Verifier,
    VerifierConfig,
};
pub use recognizer::{ArcFaceRecognizer, FaceRecognizer};
pub use store::{open_store, JsonStore, MemoryStore, ReferenceStore, SqliteStore};
pub use types::{BoundingBox, Embedding, MatchResult, ReferenceRecord};

use std::path::PathBuf;

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Per-user data directory: `$XDG_DATA_HOME/idcheck`, falling back to
/// `~/.local/share/idcheck`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("idcheck")
}

/// Default location of the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
