use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Integer `[x1, y1, x2, y2]` corners clamped to a `width` × `height` frame.
    ///
    /// Always satisfies `x1 < x2` and `y1 < y2`, widening by one pixel if the
    /// box collapses after truncation.
    pub fn corners(&self, width: u32, height: u32) -> [i32; 4] {
        let max_x = width.max(1) as i32;
        let max_y = height.max(1) as i32;

        let x1 = (self.x.floor() as i32).clamp(0, max_x - 1);
        let y1 = (self.y.floor() as i32).clamp(0, max_y - 1);
        let x2 = ((self.x + self.width).ceil() as i32).clamp(x1 + 1, max_x);
        let y2 = ((self.y + self.height).ceil() as i32).clamp(y1 + 1, max_y);

        [x1, y1, x2, y2]
    }

    /// Whether any part of the box lies inside a `width` × `height` frame.
    pub fn intersects_frame(&self, width: u32, height: u32) -> bool {
        self.width > 0.0
            && self.height > 0.0
            && self.x < width as f32
            && self.y < height as f32
            && self.x + self.width > 0.0
            && self.y + self.height > 0.0
    }
}

/// Face embedding vector (typically 512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>, model_version: Option<&str>) -> Self {
        Self {
            values,
            model_version: model_version.map(str::to_string),
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f64 {
        self.values
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt()
    }
}

/// One enrolled face in the reference store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceRecord {
    /// Stable handle, e.g. the enrolled file name or a subject id.
    pub id: String,
    pub embedding: Embedding,
}

/// Outcome of comparing a live embedding against one or more references.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity rounded to four decimal places.
    pub score: f64,
    /// Identifier of the matching reference record (store matching only).
    pub matched_id: Option<String>,
    pub message: String,
}

impl MatchResult {
    pub(crate) fn decided(matched: bool, score: f64, matched_id: Option<String>) -> Self {
        Self {
            matched,
            score,
            matched_id,
            message: if matched { "Match" } else { "No match" }.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: w, height: h, confidence: 0.9, landmarks: None,
        }
    }

    #[test]
    fn test_corners_truncate_outward() {
        let b = make_bbox(10.4, 20.6, 30.2, 40.1);
        assert_eq!(b.corners(640, 480), [10, 20, 41, 61]);
    }

    #[test]
    fn test_corners_clamped_to_frame() {
        let b = make_bbox(-15.0, -3.0, 700.0, 600.0);
        assert_eq!(b.corners(640, 480), [0, 0, 640, 480]);
    }

    #[test]
    fn test_corners_never_collapse() {
        let b = make_bbox(639.9, 479.9, 0.05, 0.05);
        let [x1, y1, x2, y2] = b.corners(640, 480);
        assert!(x1 < x2);
        assert!(y1 < y2);
    }

    #[test]
    fn test_intersects_frame() {
        assert!(make_bbox(10.0, 10.0, 5.0, 5.0).intersects_frame(20, 20));
        assert!(!make_bbox(30.0, 10.0, 5.0, 5.0).intersects_frame(20, 20));
        assert!(!make_bbox(-10.0, 10.0, 5.0, 5.0).intersects_frame(20, 20));
        assert!(!make_bbox(5.0, 5.0, 0.0, 5.0).intersects_frame(20, 20));
    }

    #[test]
    fn test_embedding_norm() {
        let e = Embedding::new(vec![3.0, 4.0], None);
        assert!((e.norm() - 5.0).abs() < 1e-12);
        assert_eq!(e.dim(), 2);
    }

    #[test]
    fn test_match_result_message() {
        assert_eq!(MatchResult::decided(true, 0.8, None).message, "Match");
        assert_eq!(MatchResult::decided(false, 0.1, None).message, "No match");
    }
}
