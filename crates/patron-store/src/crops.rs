//! Face crop files on disk, grouped into one directory per day.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::RgbImage;
use tracing::debug;
use uuid::Uuid;

use patron_track::NewCrop;

use crate::StoreError;

pub struct CropStore {
    root: PathBuf,
}

impl CropStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<CropStore, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(CropStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Encode the crop as JPEG and write it under `<root>/<YYYY-MM-DD>/`.
    /// Returns the path of the written file.
    pub fn save(&self, crop: &NewCrop, now: DateTime<Utc>) -> Result<PathBuf, StoreError> {
        if crop.image.is_empty() {
            return Err(StoreError::EmptyCrop);
        }
        let image = RgbImage::from_raw(
            crop.image.width,
            crop.image.height,
            crop.image.data.clone(),
        )
        .ok_or(StoreError::EmptyCrop)?;

        let day_dir = self.root.join(now.format("%Y-%m-%d").to_string());
        std::fs::create_dir_all(&day_dir)?;

        let stamp = now.format("%H%M%S");
        let tag = &Uuid::new_v4().simple().to_string()[..8];
        let file_name = match (crop.customer_id, crop.customer_name.as_deref()) {
            (Some(id), name) => format!(
                "CUST-{}_{}_{}_{}.jpg",
                id,
                sanitize(name.unwrap_or("customer")),
                stamp,
                tag
            ),
            (None, _) => format!("UNKNOWN_{}_{}.jpg", stamp, tag),
        };
        let path = day_dir.join(file_name);
        image.save_with_format(&path, image::ImageFormat::Jpeg)?;
        debug!(path = %path.display(), "crop saved");
        Ok(path)
    }
}

/// Keep file names portable: alphanumerics pass through, the rest becomes
/// underscores.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "customer".to_string()
    } else {
        cleaned
    }
}
