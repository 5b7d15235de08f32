//! Face matching engine.
//!
//! Gallery of identity descriptors, distance matching (Hungarian or greedy
//! nearest-distance), landmark-based alignment, and ONNX wrappers for the
//! detection, landmark and re-identification models.

pub mod alignment;
pub mod assignment;
pub mod detector;
pub mod embedder;
pub mod gallery;
pub mod identifier;
pub mod infer;
pub mod landmarks;
pub mod types;

pub use detector::FaceDetector;
pub use embedder::DescriptorEmbedder;
pub use gallery::{Gallery, GalleryError, Identity, MatchAlgorithm};
pub use identifier::{
    confidence_percent, FaceIdentifier, FaceMatch, IdentifierError, DEFAULT_MATCH_THRESHOLD,
    UNKNOWN_LABEL,
};
pub use infer::{cut_roi, DetectFaces, ExtractDescriptor, ModelError, RegressLandmarks};
pub use landmarks::LandmarkRegressor;
pub use types::{Descriptor, FaceBox, FaceCrop, Landmarks};
