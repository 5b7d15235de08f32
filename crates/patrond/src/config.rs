use std::path::PathBuf;

use patron_core::MatchAlgorithm;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory of frames to process (a camera feed dumped as images).
    pub frames_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory for saved face crops.
    pub crops_dir: PathBuf,
    /// Directory of reference face images for the gallery.
    pub gallery_dir: PathBuf,
    /// Cosine distance threshold for a positive match, in [0, 1].
    pub match_threshold: f32,
    /// How the query-to-identity distance matrix is resolved.
    pub match_algorithm: MatchAlgorithm,
    /// Minimum detector confidence for a face box, in [0, 1].
    pub detection_threshold: f32,
    /// Factor applied to detected boxes before cropping.
    pub roi_scale_factor: f32,
    /// Logical camera identifier stamped on events.
    pub camera_id: i64,
    /// Seconds between crop captures for a recognized customer.
    pub detection_cooldown_secs: f64,
    /// Seconds between session timeout sweeps.
    pub sweep_interval_secs: f64,
}

impl Config {
    /// Load configuration from `PATRON_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("patron");

        Self {
            frames_dir: env_path("PATRON_FRAMES_DIR", data_dir.join("frames")),
            model_dir: env_path("PATRON_MODEL_DIR", data_dir.join("models")),
            db_path: env_path("PATRON_DB_PATH", data_dir.join("patron.db")),
            crops_dir: env_path("PATRON_CROPS_DIR", data_dir.join("crops")),
            gallery_dir: env_path("PATRON_GALLERY_DIR", data_dir.join("gallery")),
            match_threshold: env_f32(
                "PATRON_MATCH_THRESHOLD",
                patron_core::DEFAULT_MATCH_THRESHOLD,
            ),
            match_algorithm: match std::env::var("PATRON_MATCH_ALGORITHM").as_deref() {
                Ok("min-dist") | Ok("min_dist") => MatchAlgorithm::MinDist,
                _ => MatchAlgorithm::Hungarian,
            },
            detection_threshold: env_f32("PATRON_DETECTION_THRESHOLD", 0.5),
            roi_scale_factor: env_f32("PATRON_ROI_SCALE_FACTOR", 1.15),
            camera_id: env_i64("PATRON_CAMERA_ID", 0),
            detection_cooldown_secs: env_f64(
                "PATRON_DETECTION_COOLDOWN_SECS",
                patron_track::DEFAULT_DETECTION_COOLDOWN_SECS,
            ),
            sweep_interval_secs: env_f64("PATRON_SWEEP_INTERVAL_SECS", 5.0),
        }
    }

    /// Reject out-of-range values before any model loads.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(format!(
                "PATRON_MATCH_THRESHOLD must be in [0, 1], got {}",
                self.match_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.detection_threshold) {
            return Err(format!(
                "PATRON_DETECTION_THRESHOLD must be in [0, 1], got {}",
                self.detection_threshold
            ));
        }
        if self.roi_scale_factor <= 0.0 {
            return Err(format!(
                "PATRON_ROI_SCALE_FACTOR must be positive, got {}",
                self.roi_scale_factor
            ));
        }
        if self.detection_cooldown_secs < 0.0 {
            return Err(format!(
                "PATRON_DETECTION_COOLDOWN_SECS must be non-negative, got {}",
                self.detection_cooldown_secs
            ));
        }
        Ok(())
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("face-detection-retail-0004.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the facial landmark model.
    pub fn landmarks_model_path(&self) -> String {
        self.model_dir
            .join("landmarks-regression-retail-0009.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face re-identification model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("face-reidentification-retail-0095.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
