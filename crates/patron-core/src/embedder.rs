//! Re-identification descriptor extractor via ONNX Runtime.
//!
//! The crop is aligned to the canonical pose from its five landmarks before
//! extraction; alignment quality directly sets matching precision, so the
//! warp happens here and not in the caller.

use std::path::Path;

use ort::session::Session;
use ort::value::TensorRef;

use crate::alignment;
use crate::infer::{to_nchw_bgr, ExtractDescriptor, ModelError};
use crate::types::{Descriptor, FaceCrop, Landmarks};

const EMBEDDER_INPUT_SIZE: usize = 128;

pub struct DescriptorEmbedder {
    session: Session,
}

impl DescriptorEmbedder {
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
            "loaded re-identification model"
        );

        Ok(Self { session })
    }
}

impl ExtractDescriptor for DescriptorEmbedder {
    fn extract(&mut self, crop: &FaceCrop, landmarks: &Landmarks) -> Result<Descriptor, ModelError> {
        if crop.is_empty() {
            return Err(ModelError::BadOutput("empty face crop".into()));
        }

        let aligned = alignment::align_face(&crop.data, crop.width, crop.height, landmarks);
        let input = to_nchw_bgr(
            &aligned,
            crop.width,
            crop.height,
            EMBEDDER_INPUT_SIZE,
            EMBEDDER_INPUT_SIZE,
        )?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("descriptor output: {e}")))?;

        if raw.is_empty() {
            return Err(ModelError::BadOutput("empty descriptor".into()));
        }

        Ok(Descriptor::new(raw.to_vec()))
    }
}
