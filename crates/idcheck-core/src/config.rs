//! Environment-driven settings shared by the daemon and the CLI.

use crate::decoder::{PopplerRasterizer, MIN_PDF_DPI};
use crate::detector::{DetectorError, ScrfdDetector};
use crate::extractor::FaceSelection;
use crate::matcher::{StorePolicy, DEFAULT_THRESHOLD};
use crate::ocr::TesseractRecognizer;
use crate::pipeline::{Providers, VerifierConfig};
use crate::recognizer::{ArcFaceRecognizer, RecognizerError};
use crate::store::open_store;
use crate::{default_data_dir, default_model_dir, ARCFACE_MODEL_FILE, SCRFD_MODEL_FILE};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Pipeline settings, loaded from `IDCHECK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Reference store; `.db`/`.sqlite`/`.sqlite3` selects SQLite, anything else JSON.
    pub store_path: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    pub live_face: FaceSelection,
    pub store_policy: StorePolicy,
    /// Attach an annotated JPEG to detect-faces results.
    pub annotate: bool,
    pub ocr_lang: String,
    pub tesseract_bin: PathBuf,
    pub pdftoppm_bin: PathBuf,
    /// Rasterization resolution for PDF documents, never below 300.
    pub pdf_dpi: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            store_path: default_data_dir().join("reference.json"),
            similarity_threshold: DEFAULT_THRESHOLD,
            live_face: FaceSelection::Single,
            store_policy: StorePolicy::FirstOverThreshold,
            annotate: true,
            ocr_lang: "eng".to_string(),
            tesseract_bin: PathBuf::from("tesseract"),
            pdftoppm_bin: PathBuf::from("pdftoppm"),
            pdf_dpi: MIN_PDF_DPI,
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let path = |key: &str, default: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(default);

        Self {
            model_dir: path("IDCHECK_MODEL_DIR", defaults.model_dir),
            store_path: path("IDCHECK_STORE_PATH", defaults.store_path),
            similarity_threshold: parse_or(
                &lookup,
                "IDCHECK_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            ),
            live_face: parse_or(&lookup, "IDCHECK_LIVE_FACE_POLICY", defaults.live_face),
            store_policy: parse_or(&lookup, "IDCHECK_STORE_POLICY", defaults.store_policy),
            annotate: lookup("IDCHECK_ANNOTATE")
                .map(|v| v != "0")
                .unwrap_or(defaults.annotate),
            ocr_lang: lookup("IDCHECK_OCR_LANG").unwrap_or(defaults.ocr_lang),
            tesseract_bin: path("IDCHECK_TESSERACT_BIN", defaults.tesseract_bin),
            pdftoppm_bin: path("IDCHECK_PDFTOPPM_BIN", defaults.pdftoppm_bin),
            pdf_dpi: parse_or(&lookup, "IDCHECK_PDF_DPI", defaults.pdf_dpi).max(MIN_PDF_DPI),
        }
    }

    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    pub fn verifier_config(&self) -> VerifierConfig {
        VerifierConfig {
            threshold: self.similarity_threshold,
            live_face: self.live_face,
            store_policy: self.store_policy,
            annotate: self.annotate,
        }
    }

    /// Load both ONNX models and wire up the subprocess and store providers.
    ///
    /// Fails fast if either model is missing or cannot be loaded.
    pub fn load_providers(&self) -> Result<Providers, LoadError> {
        let detector = ScrfdDetector::load(&self.scrfd_model_path())?;
        let recognizer = ArcFaceRecognizer::load(&self.arcface_model_path())?;

        Ok(Providers {
            detector: Arc::new(detector),
            recognizer: Arc::new(recognizer),
            text: Arc::new(TesseractRecognizer::new(
                self.tesseract_bin.clone(),
                self.ocr_lang.clone(),
            )),
            rasterizer: Arc::new(PopplerRasterizer::new(self.pdftoppm_bin.clone(), self.pdf_dpi)),
            store: open_store(&self.store_path),
        })
    }
}

/// Parse `key` through `lookup`, warning and falling back to `default` on invalid values.
pub fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid setting");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]);
        assert_eq!(s.similarity_threshold, 0.30);
        assert_eq!(s.live_face, FaceSelection::Single);
        assert_eq!(s.store_policy, StorePolicy::FirstOverThreshold);
        assert!(s.annotate);
        assert_eq!(s.pdf_dpi, 300);
        assert!(s.store_path.ends_with("idcheck/reference.json"));
        assert!(s.scrfd_model_path().ends_with("det_10g.onnx"));
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("IDCHECK_MODEL_DIR", "/opt/models"),
            ("IDCHECK_STORE_PATH", "/srv/faces.db"),
            ("IDCHECK_SIMILARITY_THRESHOLD", "0.45"),
            ("IDCHECK_LIVE_FACE_POLICY", "largest"),
            ("IDCHECK_STORE_POLICY", "best"),
            ("IDCHECK_ANNOTATE", "0"),
            ("IDCHECK_PDF_DPI", "400"),
        ]);
        assert_eq!(s.arcface_model_path(), "/opt/models/w600k_r50.onnx");
        assert_eq!(s.store_path, PathBuf::from("/srv/faces.db"));
        assert_eq!(s.similarity_threshold, 0.45);
        assert_eq!(s.live_face, FaceSelection::Largest);
        assert_eq!(s.store_policy, StorePolicy::BestOverall);
        assert!(!s.annotate);
        assert_eq!(s.pdf_dpi, 400);

        let config = s.verifier_config();
        assert_eq!(config.threshold, 0.45);
        assert!(!config.annotate);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let s = settings(&[
            ("IDCHECK_SIMILARITY_THRESHOLD", "high"),
            ("IDCHECK_STORE_POLICY", "random"),
            ("IDCHECK_PDF_DPI", "72"),
        ]);
        assert_eq!(s.similarity_threshold, 0.30);
        assert_eq!(s.store_policy, StorePolicy::FirstOverThreshold);
        assert_eq!(s.pdf_dpi, 300);
    }

    #[test]
    fn test_missing_models_fail_fast() {
        let s = settings(&[("IDCHECK_MODEL_DIR", "/nonexistent/idcheck-models")]);
        assert!(matches!(
            s.load_providers(),
            Err(LoadError::Detector(DetectorError::ModelNotFound(_)))
        ));
    }
}
