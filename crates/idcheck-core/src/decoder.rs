//! Input decoding: format resolution, image decoding and PDF first-page
//! rasterization into a single RGB bitmap.

use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Lowest resolution a document page is rendered at.
pub const MIN_PDF_DPI: u32 = 300;
const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("input is empty")]
    Empty,
    #[error("unsupported input format: {0}")]
    Unsupported(String),
    #[error("invalid {format} data: {source}")]
    Image {
        format: &'static str,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Rasterize(#[from] RasterizeError),
}

#[derive(Error, Debug)]
pub enum RasterizeError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("document rejected: {0}")]
    Rejected(String),
    #[error("rasterizer scratch I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("unreadable rasterizer output: {0}")]
    Output(String),
}

/// Raster formats accepted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    fn format(self) -> ImageFormat {
        match self {
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Png => ImageFormat::Png,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpeg",
            ImageKind::Png => "png",
        }
    }
}

/// Closed set of input kinds the pipeline understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    Image(ImageKind),
    /// Multi-page document; only the first page is considered.
    DocumentContainer,
    Unsupported(String),
}

/// Decoded RGB raster frame. Immutable once built.
#[derive(Debug, Clone)]
pub struct Bitmap {
    image: RgbImage,
}

impl Bitmap {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    /// RGB value at (x, y); coordinates outside the frame read as black.
    pub fn pixel(&self, x: i64, y: i64) -> [u8; 3] {
        if x < 0 || y < 0 || x >= self.width() as i64 || y >= self.height() as i64 {
            return [0, 0, 0];
        }
        self.image.get_pixel(x as u32, y as u32).0
    }
}

/// Renders the first page of a document container into a raster.
pub trait PageRasterizer: Send + Sync {
    fn first_page(&self, document: &[u8]) -> Result<RgbImage, RasterizeError>;
}

/// Poppler `pdftoppm`-backed rasterizer.
///
/// The document is written into a temporary directory that is removed before
/// `first_page` returns.
pub struct PopplerRasterizer {
    program: PathBuf,
    dpi: u32,
}

impl PopplerRasterizer {
    pub fn new(program: impl Into<PathBuf>, dpi: u32) -> Self {
        Self {
            program: program.into(),
            dpi: dpi.max(MIN_PDF_DPI),
        }
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }
}

impl Default for PopplerRasterizer {
    fn default() -> Self {
        Self::new("pdftoppm", MIN_PDF_DPI)
    }
}

impl PageRasterizer for PopplerRasterizer {
    fn first_page(&self, document: &[u8]) -> Result<RgbImage, RasterizeError> {
        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join("document.pdf");
        let prefix = scratch.path().join("page");
        std::fs::write(&input, document)?;

        let output = Command::new(&self.program)
            .arg("-r")
            .arg(self.dpi.to_string())
            .args(["-f", "1", "-l", "1", "-singlefile", "-png"])
            .arg(&input)
            .arg(&prefix)
            .output()
            .map_err(|source| RasterizeError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RasterizeError::Rejected(if stderr.is_empty() {
                format!("{} exited with {}", self.program.display(), output.status)
            } else {
                stderr
            }));
        }

        let page_path = prefix.with_extension("png");
        if !page_path.exists() {
            return Err(RasterizeError::Rejected("no page found in document".into()));
        }

        let page = load_page(&page_path)?;
        tracing::debug!(
            dpi = self.dpi,
            width = page.width(),
            height = page.height(),
            "rasterized first document page"
        );
        Ok(page)
    }
}

fn load_page(path: &Path) -> Result<RgbImage, RasterizeError> {
    let bytes = std::fs::read(path)?;
    image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .map(|img| img.to_rgb8())
        .map_err(|e| RasterizeError::Output(e.to_string()))
}

fn hint_extension(hint: &str) -> Option<String> {
    Path::new(hint)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Classify input bytes, using the filename hint for document containers and
/// byte sniffing for everything else.
pub fn resolve_kind(bytes: &[u8], hint: Option<&str>) -> InputKind {
    let hinted_pdf = hint
        .and_then(hint_extension)
        .is_some_and(|ext| ext == "pdf");
    if hinted_pdf || bytes.starts_with(PDF_MAGIC) {
        return InputKind::DocumentContainer;
    }

    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => InputKind::Image(ImageKind::Jpeg),
        Ok(ImageFormat::Png) => InputKind::Image(ImageKind::Png),
        Ok(other) => InputKind::Unsupported(format!("{other:?}").to_ascii_lowercase()),
        Err(_) => InputKind::Unsupported(
            hint.and_then(hint_extension)
                .unwrap_or_else(|| "unrecognized data".to_string()),
        ),
    }
}

/// Decode raw bytes into a [`Bitmap`].
pub fn decode(
    bytes: &[u8],
    hint: Option<&str>,
    rasterizer: &dyn PageRasterizer,
) -> Result<Bitmap, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    match resolve_kind(bytes, hint) {
        InputKind::DocumentContainer => Ok(Bitmap::from_rgb(rasterizer.first_page(bytes)?)),
        InputKind::Image(kind) => decode_raster(bytes, kind),
        InputKind::Unsupported(what) => Err(DecodeError::Unsupported(what)),
    }
}

/// Decode an input that must be a JPEG or PNG frame. Document containers are
/// refused, even when the bytes carry PDF magic.
pub fn decode_image(bytes: &[u8]) -> Result<Bitmap, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    match resolve_kind(bytes, None) {
        InputKind::Image(kind) => decode_raster(bytes, kind),
        InputKind::DocumentContainer => Err(DecodeError::Unsupported(
            "pdf (only identity documents may be PDFs)".to_string(),
        )),
        InputKind::Unsupported(what) => Err(DecodeError::Unsupported(what)),
    }
}

fn decode_raster(bytes: &[u8], kind: ImageKind) -> Result<Bitmap, DecodeError> {
    let image = image::load_from_memory_with_format(bytes, kind.format())
        .map_err(|source| DecodeError::Image {
            format: kind.name(),
            source,
        })?;
    Ok(Bitmap::from_rgb(image.to_rgb8()))
}
