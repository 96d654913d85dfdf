//! Verification orchestrator: the three public operations.
//!
//! Every failure leaves this module as a [`VerifyError`]; a caller either gets
//! a complete report or an error, never a partial report.

use crate::decoder::{self, Bitmap, PageRasterizer};
use crate::detector::{self, FaceDetector};
use crate::error::VerifyError;
use crate::extractor::{EmbeddingExtractor, FaceSelection};
use crate::matcher::{self, StorePolicy, DEFAULT_THRESHOLD};
use crate::ocr::{self, TextRecognizer};
use crate::recognizer::FaceRecognizer;
use crate::store::ReferenceStore;
use crate::types::MatchResult;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;

/// Tunable decision parameters.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Cosine similarity threshold for a positive match.
    pub threshold: f32,
    /// Face selection on the live frame of a document match.
    pub live_face: FaceSelection,
    pub store_policy: StorePolicy,
    /// Return an annotated JPEG with detect-faces results.
    pub annotate: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            live_face: FaceSelection::Single,
            store_policy: StorePolicy::FirstOverThreshold,
            annotate: true,
        }
    }
}

/// Capability providers, constructed once and shared by every request.
#[derive(Clone)]
pub struct Providers {
    pub detector: Arc<dyn FaceDetector>,
    pub recognizer: Arc<dyn FaceRecognizer>,
    pub text: Arc<dyn TextRecognizer>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub store: Arc<dyn ReferenceStore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceDetectionReport {
    pub faces_detected: usize,
    /// `[x1, y1, x2, y2]` per face.
    pub locations: Vec<[i32; 4]>,
    /// Base64 JPEG of the frame with boxes drawn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_with_box: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreMatchReport {
    pub success: bool,
    pub matched_with: Option<String>,
    pub similarity_score: f64,
    pub message: String,
}

impl From<MatchResult> for StoreMatchReport {
    fn from(r: MatchResult) -> Self {
        Self {
            success: r.matched,
            matched_with: r.matched_id,
            similarity_score: r.score,
            message: r.message,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentMatchReport {
    pub success: bool,
    pub similarity_score: f64,
    pub message: String,
    pub id_text_summary: String,
}

pub struct Verifier {
    extractor: EmbeddingExtractor,
    text: Arc<dyn TextRecognizer>,
    rasterizer: Arc<dyn PageRasterizer>,
    store: Arc<dyn ReferenceStore>,
    config: VerifierConfig,
}

fn ensure_non_empty(bytes: &[u8]) -> Result<(), VerifyError> {
    if bytes.is_empty() {
        Err(VerifyError::EmptyInput)
    } else {
        Ok(())
    }
}

impl Verifier {
    pub fn new(providers: Providers, config: VerifierConfig) -> Self {
        Self {
            extractor: EmbeddingExtractor::new(providers.detector, providers.recognizer),
            text: providers.text,
            rasterizer: providers.rasterizer,
            store: providers.store,
            config,
        }
    }

    /// Identity documents may be images or PDFs.
    fn decode_document(&self, bytes: &[u8], hint: Option<&str>) -> Result<Bitmap, VerifyError> {
        Ok(decoder::decode(bytes, hint, self.rasterizer.as_ref())?)
    }

    /// Live frames and detect-faces inputs must be JPEG or PNG.
    fn decode_frame(&self, bytes: &[u8]) -> Result<Bitmap, VerifyError> {
        Ok(decoder::decode_image(bytes)?)
    }

    /// Locate every face in an image. Zero faces is an error here.
    pub fn detect_faces(&self, image: &[u8]) -> Result<FaceDetectionReport, VerifyError> {
        ensure_non_empty(image)?;
        let bitmap = self.decode_frame(image)?;
        let faces = self.extractor.detector().detect(&bitmap)?;

        if faces.is_empty() {
            return Err(VerifyError::FaceNotFound);
        }

        let locations = faces
            .iter()
            .map(|f| f.corners(bitmap.width(), bitmap.height()))
            .collect();
        let image_with_box = if self.config.annotate {
            Some(encode_annotated(&bitmap, &faces)?)
        } else {
            None
        };

        tracing::info!(faces = faces.len(), "detected faces");
        Ok(FaceDetectionReport {
            faces_detected: faces.len(),
            locations,
            image_with_box,
        })
    }

    /// Match a live frame against the reference store.
    pub fn match_with_store(&self, live: &[u8]) -> Result<StoreMatchReport, VerifyError> {
        ensure_non_empty(live)?;
        let bitmap = self.decode_frame(live)?;
        let query = self.extractor.extract_single(&bitmap)?;

        let records = self.store.records()?;
        let result = matcher::match_store(
            &query,
            &records,
            self.config.threshold,
            self.config.store_policy,
        )?;

        tracing::info!(
            references = records.len(),
            matched = result.matched,
            matched_with = ?result.matched_id,
            score = result.score,
            "store match complete"
        );
        Ok(result.into())
    }

    /// Match a live frame against the dominant face of an identity document
    /// and summarize the document's text.
    pub fn match_with_document(
        &self,
        live: &[u8],
        document: &[u8],
        document_hint: Option<&str>,
    ) -> Result<DocumentMatchReport, VerifyError> {
        ensure_non_empty(live)?;
        ensure_non_empty(document)?;

        let document_bitmap = self.decode_document(document, document_hint)?;
        let live_bitmap = self.decode_frame(live)?;

        let (matched, text) = std::thread::scope(|scope| {
            let ocr_worker = std::thread::Builder::new()
                .name("idcheck-ocr".into())
                .spawn_scoped(scope, || ocr::extract_text(self.text.as_ref(), &document_bitmap))
                .map_err(|e| VerifyError::Verification(format!("failed to spawn OCR worker: {e}")))?;

            let matched = self.compare_with_document(&live_bitmap, &document_bitmap);
            let text = ocr_worker
                .join()
                .map_err(|_| VerifyError::Verification("OCR worker panicked".into()))?;
            Ok::<_, VerifyError>((matched, text))
        })?;

        let result = matched?;
        let id_text_summary = text?;

        tracing::info!(
            matched = result.matched,
            score = result.score,
            text_chars = id_text_summary.len(),
            "document match complete"
        );
        Ok(DocumentMatchReport {
            success: result.matched,
            similarity_score: result.score,
            message: result.message,
            id_text_summary,
        })
    }

    fn compare_with_document(
        &self,
        live: &Bitmap,
        document: &Bitmap,
    ) -> Result<MatchResult, VerifyError> {
        tracing::debug!("extracting embedding from ID document");
        let document_embedding = self.extractor.extract_largest(document)?;
        tracing::debug!(policy = ?self.config.live_face, "extracting embedding from live frame");
        let live_embedding = self.extractor.extract(live, self.config.live_face)?;
        Ok(matcher::compare(
            &live_embedding,
            &document_embedding,
            self.config.threshold,
        )?)
    }
}

fn encode_annotated(
    bitmap: &Bitmap,
    faces: &[crate::types::BoundingBox],
) -> Result<String, VerifyError> {
    let canvas = detector::annotate(bitmap, faces);
    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .map_err(|e| VerifyError::Verification(format!("annotated image encoding: {e}")))?;
    Ok(BASE64.encode(jpeg))
}
