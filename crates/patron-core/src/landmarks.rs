//! Five-point landmark regressor via ONNX Runtime.
//!
//! Takes a face crop and emits ten floats, five `(x, y)` pairs normalized
//! to the crop.

use std::path::Path;

use ort::session::Session;
use ort::value::TensorRef;

use crate::infer::{to_nchw_bgr, ModelError, RegressLandmarks};
use crate::types::{FaceCrop, Landmarks};

const LANDMARKS_INPUT_SIZE: usize = 48;
const LANDMARKS_POINTS: usize = 5;

pub struct LandmarkRegressor {
    session: Session,
}

impl LandmarkRegressor {
    pub fn load(model_path: &str) -> Result<Self, ModelError> {
        if !Path::new(model_path).exists() {
            return Err(ModelError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded landmark regression model"
        );

        Ok(Self { session })
    }
}

impl RegressLandmarks for LandmarkRegressor {
    fn landmarks(&mut self, crop: &FaceCrop) -> Result<Landmarks, ModelError> {
        if crop.is_empty() {
            return Err(ModelError::BadOutput("empty face crop".into()));
        }

        let input = to_nchw_bgr(
            &crop.data,
            crop.width,
            crop.height,
            LANDMARKS_INPUT_SIZE,
            LANDMARKS_INPUT_SIZE,
        )?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("landmark output: {e}")))?;

        if raw.len() != LANDMARKS_POINTS * 2 {
            return Err(ModelError::BadOutput(format!(
                "expected {} landmark coordinates, got {}",
                LANDMARKS_POINTS * 2,
                raw.len()
            )));
        }

        let mut points: Landmarks = [(0.0, 0.0); LANDMARKS_POINTS];
        for (i, point) in points.iter_mut().enumerate() {
            *point = (raw[i * 2], raw[i * 2 + 1]);
        }
        Ok(points)
    }
}
