use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    /// Grow (or shrink) the box about its center by `factor`.
    pub fn rescale(&mut self, factor: f32) {
        self.x -= self.width * 0.5 * (factor - 1.0);
        self.y -= self.height * 0.5 * (factor - 1.0);
        self.width *= factor;
        self.height *= factor;
    }

    /// Clamp the box to the frame extents.
    pub fn clip(&mut self, frame_width: f32, frame_height: f32) {
        self.x = self.x.clamp(0.0, frame_width);
        self.y = self.y.clamp(0.0, frame_height);
        self.width = self.width.clamp(0.0, frame_width - self.x);
        self.height = self.height.clamp(0.0, frame_height - self.y);
    }

    /// Corner representation `(xmin, ymin, xmax, ymax)`.
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        (self.x, self.y, self.x + self.width, self.y + self.height)
    }
}

/// Five-point facial landmarks, normalized to the face ROI:
/// [left_eye, right_eye, nose_tip, left_lip_corner, right_lip_corner].
pub type Landmarks = [(f32, f32); 5];

/// Face descriptor vector produced by the re-identification model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Cosine similarity in [-1, 1]. Zero-norm inputs yield 0.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance scaled to [0, 1]: `(1 − similarity) / 2`.
    pub fn cosine_distance(&self, other: &Descriptor) -> f32 {
        (1.0 - self.similarity(other)) * 0.5
    }
}

/// A face crop as raw interleaved RGB8 pixels.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl FaceCrop {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }
}
