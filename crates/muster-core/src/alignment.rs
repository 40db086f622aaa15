//! Face chip preparation for embedding extraction.
//!
//! The preferred path aligns the face via a 4-DOF similarity transform from
//! the five detected landmarks to the InsightFace reference positions. When
//! a detection carries no landmarks, a plain bounding-box crop resized to
//! the canonical chip size stands in.

use crate::types::FaceBox;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 chip.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Canonical chip edge length expected by the embedding model.
pub const CHIP_SIZE: u32 = 112;

/// Estimate a 2×3 similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Build overdetermined system A * [a, b, tx, ty]^T = B.
    // For each point pair (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16]; // 4x4, row-major
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    // Augmented matrix [A | b] as 4x5
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    // Forward elimination with partial pivoting
    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0]; // degenerate landmarks: identity-ish
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    // Back substitution
    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Bilinear sample of an RGB image at a fractional position.
///
/// Out-of-bounds taps contribute black, so chips near the frame edge fade
/// to zero instead of clamping to streaks.
fn bilinear(img: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = img.dimensions();
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let tap = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && px < w as i64 && py >= 0 && py < h as i64 {
            let Rgb(rgb) = *img.get_pixel(px as u32, py as u32);
            [rgb[0] as f32, rgb[1] as f32, rgb[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let tl = tap(x0, y0);
    let tr = tap(x0 + 1, y0);
    let bl = tap(x0, y0 + 1);
    let br = tap(x0 + 1, y0 + 1);

    let mut out = [0.0f32; 3];
    for c in 0..3 {
        out[c] = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
    }
    out
}

/// Warp the source image through the inverse of a similarity transform into
/// a square output chip.
fn warp_similarity(img: &RgbImage, matrix: &[f32; 6], out_size: u32) -> RgbImage {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // M = [[a, -b], [b, a]]; det = a^2 + b^2
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return RgbImage::new(out_size, out_size);
    }
    let inv_det = 1.0 / det;
    let ia = a * inv_det;
    let ib = b * inv_det;

    let mut out = RgbImage::new(out_size, out_size);
    for oy in 0..out_size {
        for ox in 0..out_size {
            // src = M_inv * (dst - t)
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let rgb = bilinear(img, sx, sy);
            out.put_pixel(
                ox,
                oy,
                Rgb([
                    rgb[0].round().clamp(0.0, 255.0) as u8,
                    rgb[1].round().clamp(0.0, 255.0) as u8,
                    rgb[2].round().clamp(0.0, 255.0) as u8,
                ]),
            );
        }
    }
    out
}

/// Align a detected face to the canonical 112×112 chip using its five
/// landmarks.
pub fn align_face(img: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let matrix = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112);
    warp_similarity(img, &matrix, CHIP_SIZE)
}

/// Landmark-free fallback: crop the detection box (clamped to the frame) and
/// resize it to the canonical chip.
///
/// Returns `None` when the box does not intersect the frame or collapses to
/// zero area — a real outcome on garbage detections, not an error.
pub fn crop_face(img: &RgbImage, face: &FaceBox) -> Option<RgbImage> {
    let (w, h) = img.dimensions();
    let x0 = face.x.max(0.0);
    let y0 = face.y.max(0.0);
    let x1 = (face.x + face.width).min(w as f32);
    let y1 = (face.y + face.height).min(h as f32);

    let crop_w = x1 - x0;
    let crop_h = y1 - y0;
    if crop_w < 1.0 || crop_h < 1.0 {
        return None;
    }

    let mut out = RgbImage::new(CHIP_SIZE, CHIP_SIZE);
    let sx_step = crop_w / CHIP_SIZE as f32;
    let sy_step = crop_h / CHIP_SIZE as f32;

    for oy in 0..CHIP_SIZE {
        for ox in 0..CHIP_SIZE {
            let sx = x0 + (ox as f32 + 0.5) * sx_step - 0.5;
            let sy = y0 + (oy as f32 + 0.5) * sy_step - 0.5;
            let rgb = bilinear(img, sx, sy);
            out.put_pixel(
                ox,
                oy,
                Rgb([
                    rgb[0].round().clamp(0.0, 255.0) as u8,
                    rgb[1].round().clamp(0.0, 255.0) as u8,
                    rgb[2].round().clamp(0.0, 255.0) as u8,
                ]),
            );
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, v: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([v, v, v]))
    }

    #[test]
    fn identity_transform_when_src_equals_dst() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = estimate_similarity_transform(&pts, &pts);

        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn double_scale_landmarks_halve_the_transform() {
        let src: [(f32, f32); 5] = [
            (76.5892, 103.3926),
            (147.0636, 103.0028),
            (112.0504, 143.4732),
            (83.0986, 184.7310),
            (141.4598, 184.4082),
        ];
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn aligned_chip_has_canonical_size() {
        let img = solid(640, 480, 128);
        let chip = align_face(&img, &REFERENCE_LANDMARKS_112);
        assert_eq!(chip.dimensions(), (CHIP_SIZE, CHIP_SIZE));
    }

    #[test]
    fn landmark_lands_near_reference_position() {
        // Paint a red patch at the left-eye landmark and verify alignment
        // carries it to the reference left-eye position.
        let mut img = solid(200, 200, 0);
        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for dy in 0..5u32 {
            for dx in 0..5u32 {
                img.put_pixel(78 + dx, 58 + dy, Rgb([255, 0, 0]));
            }
        }

        let chip = align_face(&img, &src_landmarks);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as u32;
        let mut max_red = 0u8;
        for dy in 0..3u32 {
            for dx in 0..3u32 {
                let x = (ref_x + dx).saturating_sub(1).min(CHIP_SIZE - 1);
                let y = (ref_y + dy).saturating_sub(1).min(CHIP_SIZE - 1);
                max_red = max_red.max(chip.get_pixel(x, y).0[0]);
            }
        }
        assert!(
            max_red > 100,
            "expected red patch near reference left eye ({ref_x}, {ref_y}), max={max_red}"
        );
    }

    fn face_box(x: f32, y: f32, w: f32, h: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn crop_resizes_to_chip() {
        let img = solid(320, 240, 77);
        let chip = crop_face(&img, &face_box(40.0, 40.0, 100.0, 120.0)).unwrap();
        assert_eq!(chip.dimensions(), (CHIP_SIZE, CHIP_SIZE));
        // Interior of a uniform crop stays uniform.
        assert_eq!(chip.get_pixel(56, 56).0, [77, 77, 77]);
    }

    #[test]
    fn crop_clamps_to_frame_bounds() {
        let img = solid(100, 100, 50);
        // Box hangs off the right edge; clamped region still crops.
        let chip = crop_face(&img, &face_box(60.0, 10.0, 200.0, 50.0));
        assert!(chip.is_some());
    }

    #[test]
    fn degenerate_box_yields_no_chip() {
        let img = solid(100, 100, 50);
        assert!(crop_face(&img, &face_box(200.0, 200.0, 50.0, 50.0)).is_none());
        assert!(crop_face(&img, &face_box(10.0, 10.0, 0.0, 40.0)).is_none());
    }
}
