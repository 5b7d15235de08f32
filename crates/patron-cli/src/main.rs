use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use patron_core::{
    DescriptorEmbedder, DetectFaces, FaceDetector, Gallery, LandmarkRegressor,
};
use patron_store::Database;
use patron_track::Segment;

#[derive(Parser)]
#[command(name = "patron", about = "Retail visit tracking CLI")]
struct Cli {
    /// Path to the SQLite database (default: $PATRON_DB_PATH).
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or rebuild the face gallery
    Gallery {
        #[command(subcommand)]
        command: GalleryCommands,
    },
    /// Show recent events
    Events {
        /// Number of events to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// List registered customers
    Customers {
        /// Only show customers in this segment
        #[arg(long)]
        segment: Option<String>,
    },
    /// Change a customer's segment
    Segment {
        /// Customer ID
        id: i64,
        /// One of: regular, vip, new, blacklist
        segment: String,
    },
    /// Show event counts per type
    Stats,
    /// Read or write a runtime setting
    Setting {
        key: String,
        /// New value; omit to read
        value: Option<String>,
    },
}

#[derive(Subcommand)]
enum GalleryCommands {
    /// List gallery labels and their image counts
    List {
        /// Gallery image directory
        dir: PathBuf,
    },
    /// Run all gallery images through the models and report identities
    Build {
        /// Gallery image directory
        dir: PathBuf,
        /// Directory containing the ONNX model files
        #[arg(long)]
        models: PathBuf,
        /// Match threshold for merging images of one person
        #[arg(long, default_value_t = patron_core::DEFAULT_MATCH_THRESHOLD)]
        threshold: f32,
    },
}

fn open_database(db: Option<PathBuf>) -> Result<Database> {
    let path = match db {
        Some(path) => path,
        None => match std::env::var("PATRON_DB_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => bail!("no database path; pass --db or set PATRON_DB_PATH"),
        },
    };
    Ok(Database::open(path)?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Gallery { command } => run_gallery(command),
        command => run_database_command(open_database(cli.db)?, command),
    }
}

fn run_gallery(command: GalleryCommands) -> Result<()> {
    match command {
        GalleryCommands::List { dir } => {
            let labels = scan_gallery_dir(&dir)?;
            if labels.is_empty() {
                println!("No gallery images in {}", dir.display());
                return Ok(());
            }
            for (label, count) in labels {
                println!("{label:<24} {count} image(s)");
            }
        }
        GalleryCommands::Build { dir, models, threshold } => {
            let detector_path = models.join("face-detection-retail-0004.onnx");
            let landmarks_path = models.join("landmarks-regression-retail-0009.onnx");
            let embedder_path = models.join("face-reidentification-retail-0095.onnx");

            let mut detector = FaceDetector::load(
                &detector_path.to_string_lossy(),
                patron_core::detector::DEFAULT_CONFIDENCE_THRESHOLD,
                patron_core::detector::DEFAULT_ROI_SCALE_FACTOR,
            )
            .context("loading face detector")?;
            let mut landmarks = LandmarkRegressor::load(&landmarks_path.to_string_lossy())
                .context("loading landmark regressor")?;
            let mut embedder = DescriptorEmbedder::load(&embedder_path.to_string_lossy())
                .context("loading descriptor embedder")?;

            let gallery = Gallery::build_from_dir(
                &dir,
                Some(&mut detector as &mut dyn DetectFaces),
                &mut landmarks,
                &mut embedder,
                threshold,
            )
            .context("building gallery")?;

            println!("{} identities:", gallery.len());
            for identity in gallery.identities() {
                println!(
                    "{:<24} {} descriptor(s)",
                    identity.label,
                    identity.descriptors.len()
                );
            }
        }
    }
    Ok(())
}

/// Label to image count from the on-disk layout: one level of label
/// subdirectories, plus flat files whose stem (minus any trailing
/// `-<index>`) is the label.
fn scan_gallery_dir(dir: &Path) -> Result<BTreeMap<String, usize>> {
    let mut labels: BTreeMap<String, usize> = BTreeMap::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            let count = std::fs::read_dir(&path)?
                .filter_map(|e| e.ok())
                .filter(|e| is_image(&e.path()))
                .count();
            if count > 0 {
                *labels
                    .entry(entry.file_name().to_string_lossy().into_owned())
                    .or_default() += count;
            }
        } else if is_image(&path) {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            *labels.entry(Gallery::normalize_label(stem)).or_default() += 1;
        }
    }
    Ok(labels)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

fn run_database_command(db: Database, command: Commands) -> Result<()> {
    match command {
        Commands::Gallery { .. } => unreachable!("handled before the database opens"),
        Commands::Events { limit } => {
            let events = db.recent_events(limit)?;
            if events.is_empty() {
                println!("No events recorded");
                return Ok(());
            }
            for event in events {
                let who = event.customer_name.as_deref().unwrap_or("Unknown");
                let duration = event
                    .metadata
                    .as_ref()
                    .and_then(|m| m.duration_formatted.clone())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>6}  {}  {:<14} {:<20} cam {}  conf {:>5.1}  {}",
                    event.id,
                    event.created_at.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type,
                    who,
                    event.camera_id,
                    event.confidence,
                    duration,
                );
            }
        }
        Commands::Customers { segment } => {
            let filter = segment.as_deref().map(Segment::parse);
            let customers = db.customers()?;
            let mut shown = 0;
            for c in customers {
                if filter.is_some_and(|f| c.segment != f) {
                    continue;
                }
                let last_visit = c
                    .last_visit_date
                    .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:>6}  {:<20} {:<10} visits {:>4}  last {}",
                    c.id, c.name, c.segment, c.total_visits, last_visit,
                );
                shown += 1;
            }
            if shown == 0 {
                println!("No customers found");
            }
        }
        Commands::Segment { id, segment } => {
            let parsed = Segment::parse(&segment);
            if parsed == Segment::Regular && segment != "regular" {
                bail!("unknown segment '{segment}'; expected regular, vip, new or blacklist");
            }
            db.set_customer_segment(id, parsed)?;
            println!("Customer {id} is now {parsed}");
        }
        Commands::Stats => {
            let today = db.event_count_today(Utc::now())?;
            println!("Events today: {today}");
            for stat in db.event_stats()? {
                println!("{:<16} {}", stat.event_type, stat.count);
            }
        }
        Commands::Setting { key, value } => match value {
            Some(value) => {
                db.set_setting(&key, &value)?;
                println!("{key} = {value}");
            }
            None => match db.setting(&key)? {
                Some(value) => println!("{key} = {value}"),
                None => println!("{key} is not set"),
            },
        },
    }

    Ok(())
}
