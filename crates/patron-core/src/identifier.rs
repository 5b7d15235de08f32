//! Identity resolution: threshold cutoff over gallery matches.

use thiserror::Error;

use crate::gallery::{Gallery, MatchAlgorithm};
use crate::types::Descriptor;

pub const UNKNOWN_LABEL: &str = "Unknown";
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum IdentifierError {
    #[error("match threshold must be in [0, 1], got {0}")]
    ThresholdOutOfRange(f32),
}

/// One resolved query: the gallery identity (or `None` for unknown) and the
/// cosine distance the decision was based on.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub identity: Option<usize>,
    pub distance: f32,
}

/// Applies the match threshold on top of gallery matching.
#[derive(Debug, Clone)]
pub struct FaceIdentifier {
    match_threshold: f32,
    algorithm: MatchAlgorithm,
}

impl FaceIdentifier {
    /// Fails fast when the threshold is outside the distance scale.
    pub fn new(match_threshold: f32, algorithm: MatchAlgorithm) -> Result<Self, IdentifierError> {
        if !(0.0..=1.0).contains(&match_threshold) {
            return Err(IdentifierError::ThresholdOutOfRange(match_threshold));
        }
        Ok(Self { match_threshold, algorithm })
    }

    pub fn match_threshold(&self) -> f32 {
        self.match_threshold
    }

    /// Resolve a batch of descriptors against the gallery.
    ///
    /// A match whose distance exceeds the threshold is forced to unknown and
    /// its query index recorded in the returned unknown list. This also
    /// absorbs the assignment fallback sentinel `(0, 1.0)`, since 1.0
    /// exceeds any threshold below 1.0.
    pub fn identify(
        &self,
        gallery: &Gallery,
        descriptors: &[Descriptor],
    ) -> (Vec<FaceMatch>, Vec<usize>) {
        let matches = gallery.match_faces(descriptors, self.algorithm);

        let mut results = Vec::with_capacity(matches.len());
        let mut unknowns = Vec::new();
        for (index, (identity, distance)) in matches.into_iter().enumerate() {
            if distance > self.match_threshold {
                unknowns.push(index);
                results.push(FaceMatch { identity: None, distance });
            } else {
                results.push(FaceMatch { identity: Some(identity), distance });
            }
        }
        (results, unknowns)
    }

    /// Display label for a resolved identity.
    pub fn label_for<'a>(&self, gallery: &'a Gallery, identity: Option<usize>) -> &'a str {
        identity
            .and_then(|index| gallery.get(index))
            .map(|i| i.label.as_str())
            .unwrap_or(UNKNOWN_LABEL)
    }
}

/// Recognition confidence on the 0–100 scale used by events.
pub fn confidence_percent(distance: f32) -> f32 {
    100.0 * (1.0 - distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Descriptor {
        let mut v = vec![0.0f32; dim];
        v[axis] = 1.0;
        Descriptor::new(v)
    }

    fn two_identity_gallery() -> Gallery {
        let mut g = Gallery::new();
        g.add_descriptor("alice", unit(4, 0));
        g.add_descriptor("bob", unit(4, 1));
        g
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        assert!(FaceIdentifier::new(1.5, MatchAlgorithm::Hungarian).is_err());
        assert!(FaceIdentifier::new(-0.1, MatchAlgorithm::Hungarian).is_err());
        assert!(FaceIdentifier::new(0.0, MatchAlgorithm::Hungarian).is_ok());
    }

    #[test]
    fn test_threshold_cutoff_forces_unknown() {
        let g = two_identity_gallery();
        let identifier = FaceIdentifier::new(0.3, MatchAlgorithm::MinDist).unwrap();

        // Exact alice plus an orthogonal stranger (distance 0.5 to both).
        let (results, unknowns) = identifier.identify(&g, &[unit(4, 0), unit(4, 2)]);
        assert_eq!(results[0].identity, Some(0));
        assert_eq!(results[1].identity, None);
        assert_eq!(unknowns, vec![1]);
    }

    #[test]
    fn test_assignment_fallback_resolves_to_unknown() {
        // More queries than identities: the uncovered query reports the
        // (0, 1.0) sentinel, which must become unknown for any threshold
        // below 1.0.
        let mut g = Gallery::new();
        g.add_descriptor("alice", unit(4, 0));
        let identifier = FaceIdentifier::new(0.99, MatchAlgorithm::Hungarian).unwrap();

        let (results, unknowns) = identifier.identify(&g, &[unit(4, 0), unit(4, 0)]);
        let unknown_count = results.iter().filter(|r| r.identity.is_none()).count();
        assert_eq!(unknown_count, 1);
        assert_eq!(unknowns.len(), 1);
        assert_eq!(results[unknowns[0]].distance, 1.0);
    }

    #[test]
    fn test_label_resolution() {
        let g = two_identity_gallery();
        let identifier = FaceIdentifier::new(0.3, MatchAlgorithm::Hungarian).unwrap();
        assert_eq!(identifier.label_for(&g, Some(1)), "bob");
        assert_eq!(identifier.label_for(&g, None), UNKNOWN_LABEL);
        assert_eq!(identifier.label_for(&g, Some(99)), UNKNOWN_LABEL);
    }

    #[test]
    fn test_confidence_percent_scale() {
        assert_eq!(confidence_percent(0.0), 100.0);
        assert_eq!(confidence_percent(1.0), 0.0);
        assert!((confidence_percent(0.25) - 75.0).abs() < 1e-5);
    }
}
