//! Persistence layer: SQLite database, crop file store, and the sink
//! adapter the tracker writes through.

pub mod crops;
pub mod db;
pub mod sink;

use thiserror::Error;

pub use crops::CropStore;
pub use db::{Database, Event, EventTypeCount};
pub use sink::SqliteSink;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty crop image")]
    EmptyCrop,
}
