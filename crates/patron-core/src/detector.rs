//! SSD-style retail face detector via ONNX Runtime.
//!
//! The model emits a `[1, 1, N, 7]` tensor of detections sorted by
//! descending confidence, each row
//! `[image_id, label, confidence, xmin, ymin, xmax, ymax]` with normalized
//! coordinates. Post-processing rescales each ROI about its center and
//! clips it to the frame.

use std::path::Path;

use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;

use crate::infer::{to_nchw_bgr, DetectFaces, ModelError};
use crate::types::FaceBox;

const DETECTOR_INPUT_SIZE: usize = 300;
const DETECTION_ROW_SIZE: usize = 7;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_ROI_SCALE_FACTOR: f32 = 1.15;

/// Retail SSD face detector.
#[derive(Debug)]
pub struct FaceDetector {
    session: Session,
    confidence_threshold: f32,
    roi_scale_factor: f32,
}

impl FaceDetector {
    /// Load the detector model. Fails fast on a missing file or an
    /// out-of-range threshold/scale (configuration errors stop startup).
    pub fn load(
        model_path: &str,
        confidence_threshold: f32,
        roi_scale_factor: f32,
    ) -> Result<Self, ModelError> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(ModelError::InvalidConfig(format!(
                "confidence threshold must be in [0, 1], got {confidence_threshold}"
            )));
        }
        if roi_scale_factor <= 0.0 {
            return Err(ModelError::InvalidConfig(format!(
                "ROI scale factor must be positive, got {roi_scale_factor}"
            )));
        }
        if !Path::new(model_path).exists() {
            return Err(ModelError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face detection model"
        );

        Ok(Self { session, confidence_threshold, roi_scale_factor })
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }
}

impl DetectFaces for FaceDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>, ModelError> {
        let (frame_w, frame_h) = (frame.width() as f32, frame.height() as f32);
        let input = to_nchw_bgr(
            frame.as_raw(),
            frame.width(),
            frame.height(),
            DETECTOR_INPUT_SIZE,
            DETECTOR_INPUT_SIZE,
        )?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("detection output: {e}")))?;

        if raw.len() % DETECTION_ROW_SIZE != 0 {
            return Err(ModelError::BadOutput(format!(
                "detection tensor length {} not a multiple of {DETECTION_ROW_SIZE}",
                raw.len()
            )));
        }

        let mut faces = Vec::new();
        for row in raw.chunks_exact(DETECTION_ROW_SIZE) {
            let image_id = row[0];
            if image_id < 0.0 {
                break; // end-of-detections marker
            }
            let confidence = row[2];
            if confidence < self.confidence_threshold {
                break; // rows are sorted by confidence
            }

            let mut face = FaceBox {
                x: row[3] * frame_w,
                y: row[4] * frame_h,
                width: (row[5] - row[3]) * frame_w,
                height: (row[6] - row[4]) * frame_h,
                confidence,
            };
            face.rescale(self.roi_scale_factor);
            face.clip(frame_w, frame_h);
            faces.push(face);
        }

        tracing::trace!(count = faces.len(), "faces detected");
        Ok(faces)
    }
}
