//! Inference seams shared by the model wrappers.
//!
//! The pipeline and gallery builder talk to the three models through these
//! traits so tests can substitute deterministic stubs.

use image::{imageops, RgbImage};
use ndarray::Array4;
use thiserror::Error;

use crate::types::{Descriptor, FaceBox, FaceCrop, Landmarks};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("unexpected model output: {0}")]
    BadOutput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<ort::Error<ort::session::builder::SessionBuilder>> for ModelError {
    fn from(e: ort::Error<ort::session::builder::SessionBuilder>) -> Self {
        ModelError::Ort(e.into())
    }
}

/// Face detection: frame in, confidence-sorted face boxes out.
pub trait DetectFaces {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>, ModelError>;
}

/// Landmark regression on a single face crop; points normalized to the crop.
pub trait RegressLandmarks {
    fn landmarks(&mut self, crop: &FaceCrop) -> Result<Landmarks, ModelError>;
}

/// Descriptor extraction from a face crop with known landmarks.
pub trait ExtractDescriptor {
    fn extract(&mut self, crop: &FaceCrop, landmarks: &Landmarks) -> Result<Descriptor, ModelError>;
}

/// Cut a face ROI out of a frame, clamping to the frame extents.
pub fn cut_roi(frame: &RgbImage, roi: &FaceBox) -> FaceCrop {
    let (fw, fh) = (frame.width() as f32, frame.height() as f32);
    let x0 = roi.x.clamp(0.0, fw) as u32;
    let y0 = roi.y.clamp(0.0, fh) as u32;
    let x1 = (roi.x + roi.width).clamp(0.0, fw) as u32;
    let y1 = (roi.y + roi.height).clamp(0.0, fh) as u32;

    let width = x1.saturating_sub(x0);
    let height = y1.saturating_sub(y0);
    if width == 0 || height == 0 {
        return FaceCrop { data: Vec::new(), width: 0, height: 0 };
    }

    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in y0..y1 {
        for x in x0..x1 {
            let px = frame.get_pixel(x, y);
            data.extend_from_slice(&px.0);
        }
    }
    FaceCrop { data, width, height }
}

/// Resize raw RGB8 pixels to the model input size and lay them out as a
/// NCHW float tensor in BGR channel order (the retail models' convention),
/// values kept on the raw 0–255 scale.
pub(crate) fn to_nchw_bgr(
    data: &[u8],
    width: u32,
    height: u32,
    target_width: usize,
    target_height: usize,
) -> Result<Array4<f32>, ModelError> {
    let rgb = RgbImage::from_raw(width, height, data.to_vec())
        .ok_or_else(|| ModelError::BadOutput("pixel buffer size mismatch".into()))?;
    let resized = imageops::resize(
        &rgb,
        target_width as u32,
        target_height as u32,
        imageops::FilterType::Triangle,
    );

    let mut tensor = Array4::<f32>::zeros((1, 3, target_height, target_width));
    for y in 0..target_height {
        for x in 0..target_width {
            let px = resized.get_pixel(x as u32, y as u32);
            tensor[[0, 0, y, x]] = px.0[2] as f32; // B
            tensor[[0, 1, y, x]] = px.0[1] as f32; // G
            tensor[[0, 2, y, x]] = px.0[0] as f32; // R
        }
    }
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(w: u32, h: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_fn(w, h, |_, _| image::Rgb(rgb))
    }

    #[test]
    fn test_cut_roi_clamps_to_frame() {
        let frame = solid_frame(100, 80, [10, 20, 30]);
        let roi = FaceBox { x: 90.0, y: 70.0, width: 50.0, height: 50.0, confidence: 1.0 };
        let crop = cut_roi(&frame, &roi);
        assert_eq!(crop.width, 10);
        assert_eq!(crop.height, 10);
        assert_eq!(&crop.data[0..3], &[10, 20, 30]);
    }

    #[test]
    fn test_cut_roi_outside_frame_is_empty() {
        let frame = solid_frame(100, 80, [0, 0, 0]);
        let roi = FaceBox { x: 200.0, y: 0.0, width: 50.0, height: 50.0, confidence: 1.0 };
        assert!(cut_roi(&frame, &roi).is_empty());
    }

    #[test]
    fn test_to_nchw_bgr_channel_order() {
        let tensor = to_nchw_bgr(&[255, 0, 0], 1, 1, 1, 1).unwrap();
        // Pure red input: B channel 0, G 0, R 255.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 0, 0]], 255.0);
    }
}
