//! Frame processing pipeline.
//!
//! A dedicated OS thread owns the ONNX models and the session tracker and
//! chews through frames from a [`FrameSource`]. Control traffic (stats,
//! shutdown) arrives over a tokio channel, mirroring how the async side
//! talks to any blocking engine in this codebase.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use patron_core::{
    confidence_percent, cut_roi, DescriptorEmbedder, DetectFaces, ExtractDescriptor, FaceDetector,
    FaceIdentifier, Gallery, LandmarkRegressor, ModelError, RegressLandmarks,
};
use patron_track::{Bbox, CropImage, EventSink, NewCrop, SessionTracker, Subject};

use crate::config::Config;

/// The pipeline aborts after this many consecutive frame failures.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("identifier error: {0}")]
    Identifier(#[from] patron_core::IdentifierError),
    #[error("gallery error: {0}")]
    Gallery(#[from] patron_core::GalleryError),
    #[error("frame source error: {0}")]
    Source(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pipeline thread exited")]
    ChannelClosed,
}

pub struct Frame {
    pub image: RgbImage,
}

/// Where frames come from. The daemon ships a directory source; a live
/// camera source plugs in behind the same trait.
pub trait FrameSource: Send {
    /// The next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError>;
}

/// Replays a directory of image files in file name order.
pub struct ImageDirSource {
    paths: Vec<PathBuf>,
    index: usize,
}

impl ImageDirSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<ImageDirSource, PipelineError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png" | "bmp"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        info!(dir = %dir.as_ref().display(), frames = paths.len(), "frame directory scanned");
        Ok(ImageDirSource { paths, index: 0 })
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let Some(path) = self.paths.get(self.index) else {
            return Ok(None);
        };
        self.index += 1;
        let image = image::open(path)
            .map_err(|e| PipelineError::Source(format!("{}: {e}", path.display())))?
            .to_rgb8();
        Ok(Some(Frame { image }))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub faces_seen: u64,
    pub active_sessions: usize,
}

enum PipelineRequest {
    Stats { reply: oneshot::Sender<PipelineStats> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Clone-safe handle to the pipeline thread.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<PipelineRequest>,
}

impl PipelineHandle {
    pub async fn stats(&self) -> Result<PipelineStats, PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PipelineRequest::Stats { reply: reply_tx })
            .await
            .map_err(|_| PipelineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| PipelineError::ChannelClosed)
    }

    /// Stop processing, close all sessions, and wait for the thread to wind
    /// down. Returns Ok even if the thread already exited on its own.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(PipelineRequest::Shutdown { reply: reply_tx })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = reply_rx.await;
        Ok(())
    }
}

/// Spawn the pipeline on a dedicated OS thread.
///
/// Loads all three ONNX models and builds the gallery synchronously so a
/// bad model path or gallery folder fails at startup, then enters the
/// frame loop.
pub fn spawn_pipeline(
    config: &Config,
    sink: Arc<dyn EventSink>,
    mut source: Box<dyn FrameSource>,
) -> Result<PipelineHandle, PipelineError> {
    let mut detector = FaceDetector::load(
        &config.detector_model_path(),
        config.detection_threshold,
        config.roi_scale_factor,
    )?;
    info!(path = %config.detector_model_path(), "face detector loaded");

    let mut landmarks = LandmarkRegressor::load(&config.landmarks_model_path())?;
    info!(path = %config.landmarks_model_path(), "landmark regressor loaded");

    let mut embedder = DescriptorEmbedder::load(&config.embedder_model_path())?;
    info!(path = %config.embedder_model_path(), "descriptor embedder loaded");

    let gallery = Gallery::build_from_dir(
        &config.gallery_dir,
        Some(&mut detector as &mut dyn DetectFaces),
        &mut landmarks,
        &mut embedder,
        config.match_threshold,
    )?;
    info!(identities = gallery.len(), "gallery ready");

    let identifier = FaceIdentifier::new(config.match_threshold, config.match_algorithm)?;
    let mut tracker = SessionTracker::new(sink.clone());
    tracker.set_detection_cooldown(config.detection_cooldown_secs);

    let camera_id = config.camera_id;
    let sweep_interval = Duration::from_secs_f64(config.sweep_interval_secs);
    let (tx, mut rx) = mpsc::channel::<PipelineRequest>(4);

    std::thread::Builder::new()
        .name("patron-pipeline".into())
        .spawn(move || {
            info!("pipeline thread started");
            let mut stats = PipelineStats::default();
            let mut consecutive_failures = 0u32;
            let mut last_sweep = Instant::now();
            let mut shutdown_reply = None;

            loop {
                match rx.try_recv() {
                    Ok(PipelineRequest::Stats { reply }) => {
                        let mut snapshot = stats.clone();
                        snapshot.active_sessions = tracker.active_session_count();
                        let _ = reply.send(snapshot);
                        continue;
                    }
                    Ok(PipelineRequest::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Err(mpsc::error::TryRecvError::Empty) => {}
                    Err(mpsc::error::TryRecvError::Disconnected) => break,
                }

                let frame = match source.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        info!(frames = stats.frames_processed, "frame source exhausted");
                        break;
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        warn!(error = %err, consecutive_failures, "frame read failed");
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            break;
                        }
                        continue;
                    }
                };

                match process_frame(
                    &mut detector,
                    &mut landmarks,
                    &mut embedder,
                    &identifier,
                    &gallery,
                    &mut tracker,
                    sink.as_ref(),
                    camera_id,
                    &frame,
                ) {
                    Ok(faces) => {
                        consecutive_failures = 0;
                        stats.frames_processed += 1;
                        stats.faces_seen += faces as u64;
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        warn!(error = %err, consecutive_failures, "frame inference failed");
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            break;
                        }
                    }
                }

                if last_sweep.elapsed() >= sweep_interval {
                    tracker.check_timeouts(Utc::now());
                    last_sweep = Instant::now();
                }
            }

            tracker.flush_all();
            info!(
                frames = stats.frames_processed,
                faces = stats.faces_seen,
                "pipeline thread exiting"
            );
            if let Some(reply) = shutdown_reply {
                let _ = reply.send(());
            }
        })
        .map_err(PipelineError::Io)?;

    Ok(PipelineHandle { tx })
}

/// Run one frame through detect, align, embed, identify, and track.
/// Returns the number of faces seen.
#[allow(clippy::too_many_arguments)]
fn process_frame(
    detector: &mut dyn DetectFaces,
    landmarks: &mut dyn RegressLandmarks,
    embedder: &mut dyn ExtractDescriptor,
    identifier: &FaceIdentifier,
    gallery: &Gallery,
    tracker: &mut SessionTracker,
    sink: &dyn EventSink,
    camera_id: i64,
    frame: &Frame,
) -> Result<usize, ModelError> {
    let faces = detector.detect(&frame.image)?;
    if faces.is_empty() {
        return Ok(0);
    }

    // A bad face never takes the frame down with it: degenerate boxes at
    // the frame edge and per-face inference errors just drop that face.
    let mut kept = Vec::with_capacity(faces.len());
    let mut crops = Vec::with_capacity(faces.len());
    let mut descriptors = Vec::with_capacity(faces.len());
    for face in &faces {
        let crop = cut_roi(&frame.image, face);
        if crop.is_empty() {
            debug!(x = face.x, y = face.y, "empty face crop, skipping");
            continue;
        }
        let points = match landmarks.landmarks(&crop) {
            Ok(points) => points,
            Err(err) => {
                warn!(error = %err, "landmark regression failed, skipping face");
                continue;
            }
        };
        match embedder.extract(&crop, &points) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(err) => {
                warn!(error = %err, "descriptor extraction failed, skipping face");
                continue;
            }
        }
        kept.push(face);
        crops.push(crop);
    }
    if kept.is_empty() {
        return Ok(faces.len());
    }

    let (matches, _) = identifier.identify(gallery, &descriptors);
    let now = Utc::now();

    for (i, m) in matches.iter().enumerate() {
        let face = kept[i];
        let bbox = Bbox {
            xmin: face.x,
            ymin: face.y,
            xmax: face.x + face.width,
            ymax: face.y + face.height,
        };
        let subject = match m.identity.and_then(|index| gallery.get(index)) {
            Some(identity) => Subject::Known {
                face_id: identity.label.clone(),
            },
            None => Subject::Unknown,
        };
        let confidence = match subject {
            Subject::Known { .. } => confidence_percent(m.distance),
            Subject::Unknown => 0.0,
        };

        let Some(observation) = tracker.observe(&subject, confidence, bbox, camera_id, now) else {
            continue;
        };
        debug!(
            event_id = observation.event_id,
            event_type = %observation.event_type,
            customer = observation.customer_name.as_deref(),
            new_session = observation.is_new_session,
            "face observed"
        );

        if observation.should_save_crop {
            let crop = &crops[i];
            let new_crop = NewCrop {
                image: CropImage {
                    data: crop.data.clone(),
                    width: crop.width,
                    height: crop.height,
                },
                customer_name: observation.customer_name.clone(),
                customer_id: observation.customer_id,
                event_id: Some(observation.event_id),
                bbox,
                confidence,
            };
            // Crop storage is best effort; a failed write never stalls the
            // frame loop.
            if let Err(err) = sink.save_crop(new_crop) {
                warn!(event_id = observation.event_id, error = %err, "crop save failed");
            }
        }
    }

    Ok(faces.len())
}
