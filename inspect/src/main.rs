//! Offline check of saved frames against the donation detector.
//!
//! Usage: `donation-watch-inspect [--config <path>] [--save <dir>] <input>...`
//!
//! An input directory must hold exactly three images (previous, current,
//! next, in file-name order) and runs the full temporal detector. A single
//! image runs the region locator directly.

use clap::Parser;
use donation_watch_common::config::{Config, DetectorConfig};
use donation_watch_common::frame::Frame;
use donation_watch_detector::{DonationRegion, Rejection, RegionLocator, TemporalDetector};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, thiserror::Error)]
enum InspectError {
    #[error("failed to read {0}: {1}")]
    ReadImage(String, image::ImageError),
    #[error("failed to list {0}: {1}")]
    ReadDir(String, std::io::Error),
    #[error("{0} holds {1} images, expected 3")]
    NotTriplet(String, usize),
    #[error("frames in {0} differ in size")]
    MixedSizes(String),
    #[error("failed to save crop {0}: {1}")]
    Save(String, image::ImageError),
}

#[derive(Debug, PartialEq)]
enum Verdict {
    Found(DonationRegion),
    NotFound(Option<Rejection>),
}

/// Check saved frames for a donation alert.
#[derive(Parser, Debug)]
#[command(name = "donation-watch-inspect")]
struct Args {
    /// Detector settings are read from this file's `[detector]` section.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Save each found donation crop into this directory.
    #[arg(long = "save", value_name = "DIR")]
    save_dir: Option<PathBuf>,
    /// Image files, or directories holding exactly three images.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".parse().unwrap_or_default()),
        )
        .init();

    let args = Args::parse();

    let detector = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c.detector,
            Err(e) => {
                eprintln!("Failed to load config from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => DetectorConfig::default(),
    };

    let mut failed = false;
    for input in &args.inputs {
        match inspect(input, &detector, args.save_dir.as_deref()) {
            Ok(Verdict::Found(region)) => println!(
                "{}: YES x={}..{} y={}..{}",
                input.display(),
                region.from_x,
                region.to_x,
                region.from_y,
                region.to_y
            ),
            Ok(Verdict::NotFound(Some(reason))) => println!("{}: NO ({reason:?})", input.display()),
            Ok(Verdict::NotFound(None)) => println!("{}: NO", input.display()),
            Err(e) => {
                error!(input = %input.display(), error = %e, "inspection failed");
                failed = true;
            }
        }
    }
    if failed {
        std::process::exit(1);
    }
}

fn inspect(
    input: &Path,
    config: &DetectorConfig,
    save_dir: Option<&Path>,
) -> Result<Verdict, InspectError> {
    let locator = RegionLocator::new(config.clone());

    let (region, source) = if input.is_dir() {
        let frames = load_triplet(input)?;
        let mut detector = TemporalDetector::new(locator);
        let mut detection = None;
        for frame in frames {
            detection = detector.on_frame(frame);
        }
        match detection {
            Some(d) => (d.region, d.triplet[1].clone()),
            None => return Ok(Verdict::NotFound(None)),
        }
    } else {
        let frame = load_frame(input, 0)?;
        match locator.analyse(&frame) {
            Ok(region) => (region, frame),
            Err(reason) => return Ok(Verdict::NotFound(Some(reason))),
        }
    };

    if let Some(dir) = save_dir {
        save_crop(dir, input, &region.extract(&source))?;
    }
    Ok(Verdict::Found(region))
}

fn load_frame(path: &Path, seq: u64) -> Result<Frame, InspectError> {
    let img = image::open(path)
        .map_err(|e| InspectError::ReadImage(path.display().to_string(), e))?
        .to_rgb8();
    debug!(path = %path.display(), width = img.width(), height = img.height(), "image loaded");
    Ok(Frame::from_rgb_image(&img, seq, 0))
}

fn load_triplet(dir: &Path) -> Result<Vec<Frame>, InspectError> {
    let images = list_images(dir)?;
    if images.len() != 3 {
        return Err(InspectError::NotTriplet(dir.display().to_string(), images.len()));
    }
    let frames = images
        .iter()
        .enumerate()
        .map(|(seq, path)| load_frame(path, seq as u64))
        .collect::<Result<Vec<_>, _>>()?;
    if frames
        .windows(2)
        .any(|w| (w[0].width, w[0].height) != (w[1].width, w[1].height))
    {
        return Err(InspectError::MixedSizes(dir.display().to_string()));
    }
    Ok(frames)
}

/// Image files in `dir`, sorted by file name.
fn list_images(dir: &Path) -> Result<Vec<PathBuf>, InspectError> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| InspectError::ReadDir(dir.display().to_string(), e))?;
    let mut images: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    images.sort();
    Ok(images)
}

fn save_crop(dir: &Path, input: &Path, crop: &Frame) -> Result<(), InspectError> {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let path = dir.join(format!("{stem}_donation.png"));
    if let Err(e) = std::fs::create_dir_all(dir) {
        return Err(InspectError::Save(
            path.display().to_string(),
            image::ImageError::IoError(e),
        ));
    }
    crop.to_rgb_image()
        .save(&path)
        .map_err(|e| InspectError::Save(path.display().to_string(), e))
}
