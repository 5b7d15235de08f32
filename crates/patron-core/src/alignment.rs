//! Face alignment for descriptor extraction.
//!
//! Warps a detected face crop so its five landmarks land on the canonical
//! re-identification reference positions. The transform is a similarity
//! estimated from normalized point sets via the orthogonal polar factor
//! (the `U·Vᵀ` of the cross-covariance SVD).

use crate::types::Landmarks;

/// Reference landmarks as fractions of a 96×112 canonical frame:
/// left eye, right eye, nose tip, left lip corner, right lip corner.
const REFERENCE_LANDMARKS: Landmarks = [
    (30.2946 / 96.0, 51.6963 / 112.0),
    (65.5318 / 96.0, 51.5014 / 112.0),
    (48.0252 / 96.0, 71.7366 / 112.0),
    (33.5493 / 96.0, 92.3655 / 112.0),
    (62.7299 / 96.0, 92.2041 / 112.0),
];

/// A 2×3 affine transform, row-major:
/// ```text
/// | m[0]  m[1]  m[2] |
/// | m[3]  m[4]  m[5] |
/// ```
pub type Transform = [f32; 6];

/// Subtract the per-axis mean and divide by the scalar std over all
/// coordinates. Returns `(mean, std)`; the points are modified in place.
fn normalize_points(pts: &mut [(f32, f32); 5]) -> ((f32, f32), f32) {
    let n = pts.len() as f32;
    let mean_x = pts.iter().map(|p| p.0).sum::<f32>() / n;
    let mean_y = pts.iter().map(|p| p.1).sum::<f32>() / n;

    for p in pts.iter_mut() {
        p.0 -= mean_x;
        p.1 -= mean_y;
    }

    // Population std over all 10 centered coordinates.
    let sum_sq: f32 = pts.iter().map(|p| p.0 * p.0 + p.1 * p.1).sum();
    let std = (sum_sq / (2.0 * n)).sqrt();

    if std > 1e-12 {
        for p in pts.iter_mut() {
            p.0 /= std;
            p.1 /= std;
        }
    }

    ((mean_x, mean_y), std)
}

/// Orthogonal polar factor of a 2×2 matrix, equal to `U·Vᵀ` from its SVD.
///
/// Closed form: `Q = (C + sgn(det C)·adj(C)ᵀ) / h` with `h` the common
/// column norm. Near-singular input falls back to the identity.
fn polar_factor(c: [f32; 4]) -> [f32; 4] {
    let det = c[0] * c[3] - c[1] * c[2];
    let sgn = if det < 0.0 { -1.0 } else { 1.0 };

    let q00 = c[0] + sgn * c[3];
    let q01 = c[1] - sgn * c[2];
    let q10 = c[2] - sgn * c[1];
    let q11 = c[3] + sgn * c[0];

    let h = (q00 * q00 + q10 * q10).sqrt();
    if h < 1e-12 {
        return [1.0, 0.0, 0.0, 1.0];
    }

    [q00 / h, q01 / h, q10 / h, q11 / h]
}

/// Estimate the similarity transform mapping `src` points onto `dst` points.
///
/// Both point sets are normalized (per-axis mean, scalar std); the rotation
/// is `R = (U·Vᵀ)ᵀ` from the SVD of `src_nᵀ·dst_n`, scaled by the std ratio
/// and composed with the mean offset.
pub fn estimate_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Transform {
    let mut src_n = *src;
    let mut dst_n = *dst;
    let (src_mean, src_std) = normalize_points(&mut src_n);
    let (dst_mean, dst_std) = normalize_points(&mut dst_n);

    // Cross-covariance C = src_nᵀ · dst_n (2×2, row-major).
    let mut c = [0.0f32; 4];
    for i in 0..5 {
        c[0] += src_n[i].0 * dst_n[i].0;
        c[1] += src_n[i].0 * dst_n[i].1;
        c[2] += src_n[i].1 * dst_n[i].0;
        c[3] += src_n[i].1 * dst_n[i].1;
    }

    let q = polar_factor(c);
    // R = (U·Vᵀ)ᵀ
    let r = [q[0], q[2], q[1], q[3]];

    let scale = if src_std > 1e-12 { dst_std / src_std } else { 1.0 };
    let m = [r[0] * scale, r[1] * scale, r[2] * scale, r[3] * scale];

    [
        m[0],
        m[1],
        dst_mean.0 - (m[0] * src_mean.0 + m[1] * src_mean.1),
        m[2],
        m[3],
        dst_mean.1 - (m[2] * src_mean.0 + m[3] * src_mean.1),
    ]
}

/// Sample an interleaved RGB8 image bilinearly at `(sx, sy)`.
/// Out-of-bounds reads contribute black.
fn sample_bilinear(data: &[u8], width: usize, height: usize, sx: f32, sy: f32) -> [f32; 3] {
    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let fetch = |x: i64, y: i64, ch: usize| -> f32 {
        if x >= 0 && (x as usize) < width && y >= 0 && (y as usize) < height {
            data[(y as usize * width + x as usize) * 3 + ch] as f32
        } else {
            0.0
        }
    };

    let mut out = [0.0f32; 3];
    for (ch, v) in out.iter_mut().enumerate() {
        *v = fetch(x0, y0, ch) * (1.0 - fx) * (1.0 - fy)
            + fetch(x0 + 1, y0, ch) * fx * (1.0 - fy)
            + fetch(x0, y0 + 1, ch) * (1.0 - fx) * fy
            + fetch(x0 + 1, y0 + 1, ch) * fx * fy;
    }
    out
}

/// Warp an RGB8 image with inverse-map semantics: the output pixel at `p`
/// samples the input at `M·p`. Output has the same dimensions as the input.
fn warp_affine_inverse(data: &[u8], width: usize, height: usize, m: &Transform) -> Vec<u8> {
    let mut output = vec![0u8; width * height * 3];

    for oy in 0..height {
        for ox in 0..width {
            let sx = m[0] * ox as f32 + m[1] * oy as f32 + m[2];
            let sy = m[3] * ox as f32 + m[4] * oy as f32 + m[5];
            let px = sample_bilinear(data, width, height, sx, sy);
            let base = (oy * width + ox) * 3;
            for ch in 0..3 {
                output[base + ch] = px[ch].round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    output
}

/// Align a face crop to the canonical pose.
///
/// `landmarks` are normalized to the crop; both the reference and detected
/// landmarks are scaled by the crop dimensions before estimating the
/// transform from canonical coordinates to crop coordinates. The returned
/// buffer has the crop's dimensions, RGB8.
pub fn align_face(data: &[u8], width: u32, height: u32, landmarks: &Landmarks) -> Vec<u8> {
    let (w, h) = (width as f32, height as f32);

    let mut desired = [(0.0f32, 0.0f32); 5];
    let mut actual = [(0.0f32, 0.0f32); 5];
    for i in 0..5 {
        desired[i] = (REFERENCE_LANDMARKS[i].0 * w, REFERENCE_LANDMARKS[i].1 * h);
        actual[i] = (landmarks[i].0 * w, landmarks[i].1 * h);
    }

    // Maps canonical positions to source positions; applied as an
    // inverse map so each output pixel pulls from the source.
    let transform = estimate_transform(&desired, &actual);
    warp_affine_inverse(data, width as usize, height as usize, &transform)
}
