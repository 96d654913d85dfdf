//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face onto the canonical 112×112 ArcFace crop using the
//! five InsightFace reference landmarks and a least-squares fit.

use crate::decoder::Bitmap;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
pub(crate) const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub(crate) const ALIGNED_SIZE: u32 = 112;

/// Forward similarity transform `dst = [a -b; b a] * src + [tx; ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    const IDENTITY: Similarity = Similarity { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Map an output coordinate back into the source frame.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return None;
        }
        let dx = x - self.tx;
        let dy = y - self.ty;
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Least-squares similarity transform from `src` landmarks to `dst` landmarks.
///
/// Each point pair contributes two rows to the overdetermined system
/// `A · [a, b, tx, ty]ᵀ = B`:
/// ```text
///   sx·a − sy·b + tx = dx
///   sy·a + sx·b + ty = dy
/// ```
/// solved through the normal equations `AᵀA · p = AᵀB`.
fn estimate_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Similarity {
    let mut ata = [[0.0f64; 4]; 4];
    let mut atb = [0.0f64; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy, dx, dy) = (sx as f64, sy as f64, dx as f64, dy as f64);
        let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
        for (row, rhs) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += row[j] * row[k];
                }
                atb[j] += row[j] * rhs;
            }
        }
    }

    match solve_normal_equations(ata, atb) {
        Some([a, b, tx, ty]) => Similarity {
            a: a as f32,
            b: b as f32,
            tx: tx as f32,
            ty: ty as f32,
        },
        None => Similarity::IDENTITY,
    }
}

/// Gaussian elimination with partial pivoting on a 4×4 system.
/// Returns `None` for a singular matrix (e.g. all landmarks coincide).
#[allow(clippy::needless_range_loop)]
fn solve_normal_equations(mut m: [[f64; 4]; 4], mut rhs: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f64; 4];
    for i in (0..4).rev() {
        let tail: f64 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear sample of one bitmap position; outside the frame reads as black.
fn sample_bilinear(bitmap: &Bitmap, sx: f32, sy: f32) -> [u8; 3] {
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = sx - x0;
    let fy = sy - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let weights = [
        ((x0, y0), (1.0 - fx) * (1.0 - fy)),
        ((x0 + 1, y0), fx * (1.0 - fy)),
        ((x0, y0 + 1), (1.0 - fx) * fy),
        ((x0 + 1, y0 + 1), fx * fy),
    ];

    let mut acc = [0.0f32; 3];
    for ((x, y), w) in weights {
        let p = bitmap.pixel(x, y);
        for c in 0..3 {
            acc[c] += p[c] as f32 * w;
        }
    }
    acc.map(|v| v.round().clamp(0.0, 255.0) as u8)
}

/// Align a detected face to the canonical 112×112 RGB crop.
pub fn align_face(bitmap: &Bitmap, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = estimate_similarity(landmarks, &REFERENCE_LANDMARKS_112);

    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        match transform.invert_point(ox as f32, oy as f32) {
            Some((sx, sy)) => Rgb(sample_bilinear(bitmap, sx, sy)),
            None => Rgb([0, 0, 0]),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let t = estimate_similarity(&pts, &pts);
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3, "tx = {}", t.tx);
        assert!(t.ty.abs() < 1e-3, "ty = {}", t.ty);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale → a ≈ 0.5
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = estimate_similarity(&src, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 0.5).abs() < 1e-3, "a = {}, expected ~0.5", t.a);
        assert!(t.b.abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_landmarks_fall_back_to_identity() {
        let src = [(10.0, 10.0); 5];
        let t = estimate_similarity(&src, &REFERENCE_LANDMARKS_112);
        assert_eq!(t, Similarity::IDENTITY);
    }

    #[test]
    fn test_invert_point_roundtrip() {
        let t = Similarity { a: 0.8, b: 0.3, tx: 5.0, ty: -2.0 };
        let (sx, sy) = (17.0f32, 42.0f32);
        let dx = t.a * sx - t.b * sy + t.tx;
        let dy = t.b * sx + t.a * sy + t.ty;
        let (rx, ry) = t.invert_point(dx, dy).unwrap();
        assert!((rx - sx).abs() < 1e-3);
        assert!((ry - sy).abs() < 1e-3);
    }

    #[test]
    fn test_align_face_output_size() {
        let bitmap = Bitmap::from_rgb(RgbImage::from_pixel(640, 480, Rgb([128, 128, 128])));
        let aligned = align_face(&bitmap, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(aligned.get_pixel(56, 56), &Rgb([128, 128, 128]));
    }

    #[test]
    fn test_landmark_roundtrip() {
        // A bright patch at the source left eye must land near the reference left eye.
        let mut frame = RgbImage::new(200, 200);
        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for dy in 0..5 {
            for dx in 0..5 {
                frame.put_pixel(78 + dx, 58 + dy, Rgb([255, 0, 255]));
            }
        }

        let aligned = align_face(&Bitmap::from_rgb(frame), &src_landmarks);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as u32;
        let max_red = (ref_y - 1..=ref_y + 1)
            .flat_map(|y| (ref_x - 1..=ref_x + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y).0[0])
            .max()
            .unwrap_or(0);
        assert!(max_red > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_red}");
        // Green channel stays dark: channels are warped independently.
        assert!(aligned.get_pixel(ref_x, ref_y).0[1] < 10);
    }
}
