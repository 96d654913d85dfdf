//! SCRFD face detector via ONNX Runtime.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor-free decoding and NMS post-processing.

use crate::decoder::Bitmap;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

const ANNOTATION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const ANNOTATION_THICKNESS: i64 = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download it from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty frame ({0}x{1})")]
    EmptyFrame(u32, u32),
    #[error("detector session poisoned by an earlier panic")]
    Poisoned,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates faces in a decoded bitmap.
pub trait FaceDetector: Send + Sync {
    /// Detected faces, highest confidence first. An empty result is not an error.
    fn detect(&self, bitmap: &Bitmap) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
///
/// The ONNX session is not assumed to be re-entrant; calls are serialized
/// through a per-instance lock.
pub struct ScrfdDetector {
    session: Mutex<Session>,
    input_height: usize,
    input_width: usize,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if num_outputs < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            input_height: SCRFD_INPUT_SIZE,
            input_width: SCRFD_INPUT_SIZE,
            stride_indices,
        })
    }

    /// Letterbox an RGB bitmap into a NCHW float tensor normalized for SCRFD.
    fn preprocess(&self, bitmap: &Bitmap) -> (Array4<f32>, LetterboxInfo) {
        let width = bitmap.width() as usize;
        let height = bitmap.height() as usize;

        let scale_w = self.input_width as f32 / width as f32;
        let scale_h = self.input_height as f32 / height as f32;
        let scale = scale_w.min(scale_h);

        let new_w = ((width as f32 * scale).round() as usize).clamp(1, self.input_width);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, self.input_height);
        let pad_x = (self.input_width - new_w) as f32 / 2.0;
        let pad_y = (self.input_height - new_h) as f32 / 2.0;

        let letterbox = LetterboxInfo { scale, pad_x, pad_y };

        // Triangle filter = bilinear interpolation.
        let resized = imageops::resize(
            bitmap.as_rgb(),
            new_w as u32,
            new_h as u32,
            FilterType::Triangle,
        );

        // Padding is left at 0.0, which is SCRFD_MEAN after normalization.
        let pad_x_start = pad_x.floor() as usize;
        let pad_y_start = pad_y.floor() as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, self.input_height, self.input_width));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let tx = pad_x_start + x as usize;
            let ty = pad_y_start + y as usize;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, letterbox)
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&self, bitmap: &Bitmap) -> Result<Vec<BoundingBox>, DetectorError> {
        if bitmap.width() == 0 || bitmap.height() == 0 {
            return Err(DetectorError::EmptyFrame(bitmap.width(), bitmap.height()));
        }

        let (input, letterbox) = self.preprocess(bitmap);

        let mut all_detections = Vec::new();
        {
            let mut session = self.session.lock().map_err(|_| DetectorError::Poisoned)?;
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

            for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
                let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

                let (_, scores) = outputs[score_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
                let (_, bboxes) = outputs[bbox_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
                let (_, kps) = outputs[kps_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

                all_detections.extend(decode_stride(
                    scores,
                    bboxes,
                    kps,
                    stride,
                    self.input_width,
                    self.input_height,
                    &letterbox,
                    SCRFD_CONFIDENCE_THRESHOLD,
                ));
            }
        }

        let mut result = nms(all_detections, SCRFD_NMS_THRESHOLD);
        result.retain(|b| b.intersects_frame(bitmap.width(), bitmap.height()));

        tracing::debug!(faces = result.len(), "SCRFD detection complete");
        Ok(result)
    }
}

/// Draw face rectangles onto a copy of the bitmap.
pub fn annotate(bitmap: &Bitmap, faces: &[BoundingBox]) -> RgbImage {
    let mut canvas = bitmap.as_rgb().clone();
    let (w, h) = (bitmap.width(), bitmap.height());

    for face in faces {
        let [x1, y1, x2, y2] = face.corners(w, h).map(i64::from);
        for t in 0..ANNOTATION_THICKNESS {
            for x in x1..x2 {
                put(&mut canvas, x, y1 + t);
                put(&mut canvas, x, y2 - 1 - t);
            }
            for y in y1..y2 {
                put(&mut canvas, x1 + t, y);
                put(&mut canvas, x2 - 1 - t, y);
            }
        }
    }

    canvas
}

fn put(canvas: &mut RgbImage, x: i64, y: i64) {
    if x >= 0 && y >= 0 && x < canvas.width() as i64 && y < canvas.height() as i64 {
        canvas.put_pixel(x as u32, y as u32, ANNOTATION_COLOR);
    }
}

/// Discover output tensor ordering by name.
///
/// SCRFD exports name tensors either "score_8", "bbox_16", ... or with generic
/// numbers. Unrecognized names fall back to the standard positional ordering:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
///   [6-8] = kps    (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(found) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [found[0], found[1], found[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping"
            );
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level.
#[allow(clippy::too_many_arguments)]
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_width: usize,
    input_height: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_h = input_height / stride;
    let grid_w = input_width / stride;
    let num_anchors = grid_h * grid_w * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let unmap = |x: f32, y: f32| -> (f32, f32) {
        (
            (x - letterbox.pad_x) / letterbox.scale,
            (y - letterbox.pad_y) / letterbox.scale,
        )
    };

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid_w) as f32 * s;
        let anchor_cy = (anchor_idx / grid_w) as f32 * s;

        let Some(off) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = unmap(anchor_cx - off[0] * s, anchor_cy - off[1] * s);
        let (x2, y2) = unmap(anchor_cx + off[2] * s, anchor_cy + off[3] * s);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| unmap(anchor_cx + k[i * 2] * s, anchor_cy + k[i * 2 + 1] * s))
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
/// Output is ordered by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|kept| iou(kept, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: w, height: h, confidence: conf, landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_decode_stride_maps_through_letterbox() {
        // 32x32 input, stride 16 → 2x2 grid, 8 anchors. Only anchor 2 fires
        // (cell index 1 → cx=16, cy=0).
        let mut scores = vec![0.0f32; 8];
        scores[2] = 0.9;
        let mut bboxes = vec![0.0f32; 32];
        bboxes[8..12].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);
        let kps = vec![0.0f32; 80];

        let letterbox = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 4.0 };
        let dets = decode_stride(&scores, &bboxes, &kps, 16, 32, 32, &letterbox, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        // letterboxed x1 = 16 - 8 = 8 → 4; y1 = 0 → (0 - 4) / 2 = -2
        assert!((d.x - 4.0).abs() < 1e-6);
        assert!((d.y + 2.0).abs() < 1e-6);
        assert!((d.width - 8.0).abs() < 1e-6);
        assert!((d.height - 8.0).abs() < 1e-6);
        let lms = d.landmarks.expect("landmarks decoded");
        assert!((lms[0].0 - 8.0).abs() < 1e-6);
        assert!((lms[0].1 + 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_below_threshold() {
        let scores = vec![0.5f32; 8];
        let dets = decode_stride(
            &scores,
            &[0.0; 32],
            &[0.0; 80],
            16,
            32,
            32,
            &LetterboxInfo { scale: 1.0, pad_x: 0.0, pad_y: 0.0 },
            0.5,
        );
        assert!(dets.is_empty());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (428 + i).to_string()).collect();
        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_annotate_draws_on_copy() {
        let bitmap = Bitmap::from_rgb(RgbImage::from_pixel(20, 20, Rgb([10, 10, 10])));
        let faces = vec![make_bbox(4.0, 4.0, 10.0, 10.0, 0.9)];
        let annotated = annotate(&bitmap, &faces);

        assert_eq!(annotated.get_pixel(4, 4), &ANNOTATION_COLOR);
        assert_eq!(annotated.get_pixel(13, 9), &ANNOTATION_COLOR);
        assert_eq!(annotated.get_pixel(9, 9), &Rgb([10, 10, 10]));
        // Input untouched.
        assert_eq!(bitmap.pixel(4, 4), [10, 10, 10]);
    }

    #[test]
    fn test_load_missing_model() {
        assert!(matches!(
            ScrfdDetector::load("/nonexistent/det_10g.onnx"),
            Err(DetectorError::ModelNotFound(_))
        ));
    }
}
