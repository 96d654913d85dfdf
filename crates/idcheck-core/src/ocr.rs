//! Document text extraction.
//!
//! OCR runs over the full bitmap; recognized fragments are flattened into a
//! single space-separated summary in detection order.

use crate::decoder::Bitmap;
use image::ImageFormat;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} failed: {message}")]
    Engine { program: String, message: String },
    #[error("OCR scratch I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to stage bitmap for OCR: {0}")]
    Stage(#[from] image::ImageError),
}

/// One recognized run of text, typically a line.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub text: String,
    /// Mean word confidence reported by the engine (0–100).
    pub confidence: f32,
}

/// OCR capability provider.
pub trait TextRecognizer: Send + Sync {
    /// Fragments in detection order. No text is an empty vector, not an error.
    fn recognize(&self, bitmap: &Bitmap) -> Result<Vec<TextFragment>, OcrError>;
}

/// Run OCR and flatten the result into a single summary string.
pub fn extract_text(recognizer: &dyn TextRecognizer, bitmap: &Bitmap) -> Result<String, OcrError> {
    let fragments = recognizer.recognize(bitmap)?;
    tracing::debug!(fragments = fragments.len(), "OCR complete");
    Ok(join_fragments(&fragments))
}

fn join_fragments(fragments: &[TextFragment]) -> String {
    fragments
        .iter()
        .map(|f| f.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tesseract-backed recognizer driven through its TSV output.
///
/// Each call stages the bitmap in its own temporary directory and spawns a
/// separate process, so concurrent calls do not share engine state.
pub struct TesseractRecognizer {
    program: PathBuf,
    language: String,
}

impl TesseractRecognizer {
    pub fn new(program: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            language: language.into(),
        }
    }
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new("tesseract", "eng")
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, bitmap: &Bitmap) -> Result<Vec<TextFragment>, OcrError> {
        let scratch = tempfile::tempdir()?;
        let page = scratch.path().join("page.png");
        bitmap.as_rgb().save_with_format(&page, ImageFormat::Png)?;

        let program = self.program.display().to_string();
        let output = Command::new(&self.program)
            .arg(&page)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .output()
            .map_err(|source| OcrError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(OcrError::Engine {
                program,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Word-level TSV row level.
const TSV_WORD_LEVEL: &str = "5";

/// Group Tesseract TSV word rows into line fragments, preserving order.
fn parse_tsv(tsv: &str) -> Vec<TextFragment> {
    // (page, block, paragraph, line) identifies a line.
    let mut lines: Vec<((String, String, String, String), Vec<String>, Vec<f32>)> = Vec::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != TSV_WORD_LEVEL {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }
        let confidence: f32 = cols[10].trim().parse().unwrap_or(0.0);
        let key = (
            cols[1].to_string(),
            cols[2].to_string(),
            cols[3].to_string(),
            cols[4].to_string(),
        );

        match lines.last_mut() {
            Some((last_key, words, confs)) if *last_key == key => {
                words.push(word.to_string());
                confs.push(confidence);
            }
            _ => lines.push((key, vec![word.to_string()], vec![confidence])),
        }
    }

    lines
        .into_iter()
        .map(|(_, words, confs)| TextFragment {
            text: words.join(" "),
            confidence: confs.iter().sum::<f32>() / confs.len() as f32,
        })
        .collect()
}
