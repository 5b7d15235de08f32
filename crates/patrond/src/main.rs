use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use patron_store::{CropStore, Database, SqliteSink};

mod config;
mod pipeline;

use config::Config;
use pipeline::ImageDirSource;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("patrond starting");

    let mut config = Config::from_env();
    config.validate().map_err(anyhow::Error::msg)?;

    let db = Arc::new(Database::open(&config.db_path).context("opening database")?);
    tracing::info!(path = %config.db_path.display(), "database opened");

    // The stored setting wins over the built-in default so the cooldown can
    // be tuned without restarting with new environment variables.
    config.detection_cooldown_secs = db.detection_cooldown()?;

    let crops = CropStore::new(&config.crops_dir).context("preparing crop store")?;
    let sink = Arc::new(SqliteSink::new(db, crops));

    let source = ImageDirSource::new(&config.frames_dir).context("scanning frames directory")?;
    let handle = pipeline::spawn_pipeline(&config, sink, Box::new(source))
        .context("starting pipeline")?;

    tracing::info!("patrond ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("patrond shutting down");

    let stats = handle.stats().await.unwrap_or_default();
    handle.shutdown().await?;
    tracing::info!(
        frames = stats.frames_processed,
        faces = stats.faces_seen,
        "patrond stopped"
    );

    Ok(())
}
