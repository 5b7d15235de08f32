//! In-memory gallery of registered identities.
//!
//! Each identity carries one or more descriptors; matching builds a
//! query×identity distance matrix from the per-identity minimum cosine
//! distance and resolves it either greedily or as a 1:1 assignment.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;

use crate::assignment;
use crate::infer::{cut_roi, DetectFaces, ExtractDescriptor, ModelError, RegressLandmarks};
use crate::types::{Descriptor, FaceBox, FaceCrop};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Distance reported for queries the assignment could not cover.
/// 1.0 exceeds any usable match threshold, so downstream cutoff logic
/// resolves these to unknown.
const FALLBACK_DISTANCE: f32 = 1.0;

/// Strategy for resolving the query×identity distance matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchAlgorithm {
    /// 1:1 assignment minimizing total distance; no two faces in one frame
    /// resolve to the same identity.
    #[default]
    Hungarian,
    /// Independent per-query argmin; multiple queries may share an identity.
    MinDist,
}

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery io: {0}")]
    Io(#[from] std::io::Error),
    #[error("gallery image: {0}")]
    Image(#[from] image::ImageError),
    #[error("gallery inference: {0}")]
    Model(#[from] ModelError),
}

/// A registered person: display label plus every descriptor seen for them.
#[derive(Debug, Clone)]
pub struct Identity {
    pub label: String,
    pub descriptors: Vec<Descriptor>,
}

impl Identity {
    /// Minimum cosine distance from `query` to any stored descriptor.
    fn min_distance(&self, query: &Descriptor) -> f32 {
        self.descriptors
            .iter()
            .map(|d| query.cosine_distance(d))
            .fold(f32::INFINITY, f32::min)
    }
}

/// Strip a trailing `-<digits>` index from a label (`john-0` → `john`).
fn strip_index_suffix(label: &str) -> &str {
    if let Some(pos) = label.rfind('-') {
        let digits = &label[pos + 1..];
        if pos > 0 && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return &label[..pos];
        }
    }
    label
}

/// Gallery of identities, optionally backed by an on-disk image folder.
#[derive(Debug, Default)]
pub struct Gallery {
    root: Option<PathBuf>,
    identities: Vec<Identity>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gallery backed by an image folder; `dump_face` persists crops there.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()), identities: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Identity> {
        self.identities.get(index)
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Normalize a label: strip the trailing `-<digits>` index, lowercase.
    pub fn normalize_label(label: &str) -> String {
        strip_index_suffix(label).to_lowercase()
    }

    /// Case-insensitive lookup after normalization.
    /// Returns the matched index (if any) and the normalized label.
    pub fn find_label(&self, label: &str) -> (Option<usize>, String) {
        let normalized = Self::normalize_label(label);
        let index = self
            .identities
            .iter()
            .position(|identity| identity.label.to_lowercase() == normalized);
        (index, normalized)
    }

    /// Append a descriptor under `label`, creating the identity when the
    /// normalized label is new. Returns the pre-existing index (`None` for a
    /// newly created identity) and the normalized label.
    pub fn add_descriptor(&mut self, label: &str, descriptor: Descriptor) -> (Option<usize>, String) {
        let (matched, label) = if label.is_empty() {
            let synthesized = self.synthesize_label();
            tracing::warn!(label = %synthesized, "storing descriptor without a label");
            (None, synthesized)
        } else {
            self.find_label(label)
        };

        match matched {
            Some(index) => {
                self.identities[index].descriptors.push(descriptor);
                tracing::debug!(label = %label, index, "appended descriptor to existing identity");
            }
            None => {
                self.identities.push(Identity { label: label.clone(), descriptors: vec![descriptor] });
                tracing::debug!(label = %label, "registered new identity");
            }
        }

        (matched, label)
    }

    /// First identity whose minimum descriptor distance is below `threshold`.
    /// Used during bulk construction to merge unlabeled images of one person.
    pub fn check_if_face_exists(&self, descriptor: &Descriptor, threshold: f32) -> Option<usize> {
        self.identities
            .iter()
            .position(|identity| identity.min_distance(descriptor) < threshold)
    }

    /// Match a batch of query descriptors against the gallery.
    ///
    /// Returns `(identity_index, distance)` per query. Queries the 1:1
    /// assignment cannot cover fall back to `(0, 1.0)`; the sentinel
    /// distance exceeds any real threshold, so callers resolve it to
    /// unknown rather than treating it as an error.
    pub fn match_faces(&self, queries: &[Descriptor], algorithm: MatchAlgorithm) -> Vec<(usize, f32)> {
        if queries.is_empty() {
            return Vec::new();
        }
        if self.identities.is_empty() {
            tracing::debug!(queries = queries.len(), "matching against an empty gallery");
            return vec![(0, FALLBACK_DISTANCE); queries.len()];
        }

        let rows = queries.len();
        let cols = self.identities.len();
        let mut distances = vec![0.0f32; rows * cols];
        for (i, query) in queries.iter().enumerate() {
            for (j, identity) in self.identities.iter().enumerate() {
                distances[i * cols + j] = identity.min_distance(query);
            }
        }

        match algorithm {
            MatchAlgorithm::MinDist => (0..rows)
                .map(|i| {
                    let row = &distances[i * cols..(i + 1) * cols];
                    // Ties resolve to the lowest index.
                    let (j, d) = row
                        .iter()
                        .enumerate()
                        .fold((0usize, f32::INFINITY), |best, (j, &d)| {
                            if d < best.1 { (j, d) } else { best }
                        });
                    (j, d)
                })
                .collect(),
            MatchAlgorithm::Hungarian => assignment::solve(&distances, rows, cols)
                .into_iter()
                .enumerate()
                .map(|(i, assigned)| match assigned {
                    Some(j) => (j, distances[i * cols + j]),
                    None => (0, FALLBACK_DISTANCE),
                })
                .collect(),
        }
    }

    /// Persist a face crop under its identity's folder and register the
    /// descriptor. Returns the identity index.
    pub fn dump_face(
        &mut self,
        image: &FaceCrop,
        descriptor: Descriptor,
        label: &str,
    ) -> Result<usize, GalleryError> {
        let (matched, label) = self.add_descriptor(label, descriptor);
        let index = matched.unwrap_or(self.identities.len() - 1);

        let Some(root) = self.root.clone() else {
            return Ok(index);
        };

        let folder = root.join(&label);
        fs::create_dir_all(&folder)?;

        let image_index = if matched.is_none() { 0 } else { count_images(&folder) };
        let path = folder.join(format!("image-{image_index}.jpg"));

        if path.exists() {
            tracing::warn!(path = %path.display(), "crop file already exists, not overwriting");
            return Ok(index);
        }

        let rgb = RgbImage::from_raw(image.width, image.height, image.data.clone())
            .ok_or_else(|| GalleryError::Model(ModelError::BadOutput("crop buffer size".into())))?;
        rgb.save(&path)?;
        tracing::debug!(label = %label, path = %path.display(), "dumped face image");

        Ok(index)
    }

    /// Bulk-construct a gallery from an image folder.
    ///
    /// Subdirectory names are identity labels; images directly in the root
    /// use the filename stem with any trailing `-<index>` stripped. When a
    /// detector is supplied, descriptors of already-registered faces are
    /// merged into the existing identity regardless of label.
    pub fn build_from_dir(
        root: impl Into<PathBuf>,
        mut detector: Option<&mut dyn DetectFaces>,
        landmarks: &mut dyn RegressLandmarks,
        embedder: &mut dyn ExtractDescriptor,
        match_threshold: f32,
    ) -> Result<Self, GalleryError> {
        let root = root.into();
        if !root.is_dir() {
            tracing::info!(path = %root.display(), "gallery folder missing, creating");
            fs::create_dir_all(&root)?;
        }

        let mut gallery = Gallery::with_root(&root);

        for (path, label) in collect_gallery_images(&root)? {
            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "unreadable gallery image, skipping");
                    continue;
                }
            };

            let rois = match detector.as_deref_mut() {
                Some(det) => {
                    let found = det.detect(&image)?;
                    if found.is_empty() {
                        tracing::warn!(path = %path.display(), "no face found in gallery image");
                        continue;
                    }
                    found
                }
                None => vec![FaceBox {
                    x: 0.0,
                    y: 0.0,
                    width: image.width() as f32,
                    height: image.height() as f32,
                    confidence: 1.0,
                }],
            };

            for roi in &rois {
                let crop = cut_roi(&image, roi);
                if crop.is_empty() {
                    continue;
                }
                let points = landmarks.landmarks(&crop)?;
                let descriptor = embedder.extract(&crop, &points)?;

                if detector.is_some() {
                    if let Some(existing) = gallery.check_if_face_exists(&descriptor, match_threshold) {
                        gallery.identities[existing].descriptors.push(descriptor);
                        tracing::debug!(
                            label = %gallery.identities[existing].label,
                            "merged gallery image into existing identity"
                        );
                        continue;
                    }
                }
                gallery.add_descriptor(&label, descriptor);
            }
        }

        tracing::info!(
            identities = gallery.len(),
            path = %root.display(),
            "gallery constructed"
        );
        Ok(gallery)
    }

    /// `face<N>` label for descriptors arriving without one; skips names
    /// already taken by files in the gallery root.
    fn synthesize_label(&self) -> String {
        let mut id = self.identities.len();
        if let Some(root) = &self.root {
            while root.join(format!("face{id}.jpg")).exists() {
                id += 1;
            }
        }
        format!("face{id}")
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn count_images(folder: &Path) -> usize {
    fs::read_dir(folder)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| has_image_extension(&e.path()))
                .count()
        })
        .unwrap_or(0)
}

/// Enumerate `(image_path, label)` pairs for a gallery root: one level of
/// label subdirectories plus flat images named `<label>-<index>.<ext>`.
fn collect_gallery_images(root: &Path) -> Result<Vec<(PathBuf, String)>, GalleryError> {
    let mut images = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && has_image_extension(&path) {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            images.push((path.clone(), strip_index_suffix(stem).to_string()));
        } else if path.is_dir() {
            let label = entry.file_name().to_string_lossy().into_owned();
            match fs::read_dir(&path) {
                Ok(entries) => {
                    for sub in entries.filter_map(|e| e.ok()) {
                        let sub_path = sub.path();
                        if sub_path.is_file() && has_image_extension(&sub_path) {
                            images.push((sub_path, label.clone()));
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "cannot read gallery subdirectory");
                }
            }
        }
    }

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Descriptor {
        let mut v = vec![0.0f32; dim];
        v[axis] = 1.0;
        Descriptor::new(v)
    }

    #[test]
    fn test_normalize_label_strips_index_suffix() {
        assert_eq!(Gallery::normalize_label("John-0"), "john");
        assert_eq!(Gallery::normalize_label("John-12"), "john");
        assert_eq!(Gallery::normalize_label("mary"), "mary");
        // Hyphen without a numeric suffix stays.
        assert_eq!(Gallery::normalize_label("anne-marie"), "anne-marie");
        assert_eq!(Gallery::normalize_label("-1"), "-1");
    }

    #[test]
    fn test_add_descriptor_idempotent_under_normalization() {
        let mut g = Gallery::new();
        let (first, label) = g.add_descriptor("john-0", unit(4, 0));
        assert_eq!(first, None);
        assert_eq!(label, "john");

        let (second, label) = g.add_descriptor("John-1", unit(4, 1));
        assert_eq!(second, Some(0));
        assert_eq!(label, "john");

        assert_eq!(g.len(), 1);
        assert_eq!(g.get(0).unwrap().descriptors.len(), 2);
        assert_eq!(g.get(0).unwrap().label, "john");
    }

    #[test]
    fn test_add_descriptor_empty_label_synthesizes() {
        let mut g = Gallery::new();
        let (matched, label) = g.add_descriptor("", unit(4, 0));
        assert_eq!(matched, None);
        assert_eq!(label, "face0");
    }

    #[test]
    fn test_check_if_face_exists() {
        let mut g = Gallery::new();
        g.add_descriptor("a", unit(4, 0));
        g.add_descriptor("b", unit(4, 1));

        // Identical descriptor: distance 0 < threshold.
        assert_eq!(g.check_if_face_exists(&unit(4, 1), 0.3), Some(1));
        // Orthogonal to everything: distance 0.5 ≥ threshold.
        assert_eq!(g.check_if_face_exists(&unit(4, 2), 0.3), None);
    }

    #[test]
    fn test_min_distance_uses_best_descriptor() {
        let mut g = Gallery::new();
        g.add_descriptor("a", unit(4, 0));
        g.add_descriptor("a-1", unit(4, 1));

        let matches = g.match_faces(&[unit(4, 1)], MatchAlgorithm::MinDist);
        assert_eq!(matches[0].0, 0);
        assert!(matches[0].1.abs() < 1e-6);
    }

    #[test]
    fn test_hungarian_one_to_one() {
        let mut g = Gallery::new();
        g.add_descriptor("a", unit(4, 0));
        g.add_descriptor("b", unit(4, 1));

        // Both queries prefer identity 0, but the assignment must split them.
        let near_a = Descriptor::new(vec![1.0, 0.1, 0.0, 0.0]);
        let also_near_a = Descriptor::new(vec![1.0, 0.2, 0.0, 0.0]);
        let matches = g.match_faces(&[near_a, also_near_a], MatchAlgorithm::Hungarian);
        assert_ne!(matches[0].0, matches[1].0);
    }

    #[test]
    fn test_min_dist_allows_duplicates_and_breaks_ties_low() {
        let mut g = Gallery::new();
        g.add_descriptor("a", unit(4, 0));
        g.add_descriptor("b", unit(4, 0)); // identical descriptor → tie

        let matches = g.match_faces(&[unit(4, 0), unit(4, 0)], MatchAlgorithm::MinDist);
        assert_eq!(matches[0].0, 0);
        assert_eq!(matches[1].0, 0);
    }

    #[test]
    fn test_more_queries_than_identities_falls_back() {
        let mut g = Gallery::new();
        g.add_descriptor("a", unit(4, 0));

        let queries = vec![unit(4, 0), unit(4, 1), unit(4, 2)];
        let matches = g.match_faces(&queries, MatchAlgorithm::Hungarian);
        assert_eq!(matches.len(), 3);

        let fallbacks = matches.iter().filter(|(id, d)| *id == 0 && *d == 1.0).count();
        // One query gets the real identity, the rest hit the sentinel.
        assert_eq!(fallbacks, 2);
    }

    #[test]
    fn test_empty_gallery_yields_sentinels() {
        let g = Gallery::new();
        let matches = g.match_faces(&[unit(4, 0)], MatchAlgorithm::Hungarian);
        assert_eq!(matches, vec![(0, 1.0)]);
    }
}
