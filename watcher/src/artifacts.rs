use donation_watch_common::config::OutputConfig;
use donation_watch_common::frame::Frame;
use donation_watch_detector::DonationRegion;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::keys;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to create directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to write image {0}: {1}")]
    Encode(String, image::ImageError),
    #[error("failed to serialize metadata: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write metadata {0}: {1}")]
    Sidecar(String, std::io::Error),
}

/// JSON sidecar written next to every donation image.
#[derive(Debug, Serialize)]
struct DonationMeta<'a> {
    id: &'a str,
    seq: u64,
    captured_at: String,
    from_x: u32,
    to_x: u32,
    from_y: u32,
    to_y: u32,
}

/// Writes detection output to the configured directories as PNG files.
pub struct ArtifactWriter {
    donations_dir: PathBuf,
    triplets_dir: Option<PathBuf>,
    screenshots_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            donations_dir: config.donations_dir.clone(),
            triplets_dir: config.triplets_dir.clone(),
            screenshots_dir: config.screenshots_dir.clone(),
        }
    }

    /// Save the cropped donation image plus its `.json` sidecar.
    pub fn write_donation(
        &self,
        id: &str,
        image: &Frame,
        region: &DonationRegion,
    ) -> Result<PathBuf, ArtifactError> {
        let path = keys::donation_path(&self.donations_dir, id);
        write_png(&path, image)?;

        let meta = DonationMeta {
            id,
            seq: image.seq,
            captured_at: keys::fmt_ts(image.captured_at_ms),
            from_x: region.from_x,
            to_x: region.to_x,
            from_y: region.from_y,
            to_y: region.to_y,
        };
        let sidecar = path.with_extension("json");
        std::fs::write(&sidecar, serde_json::to_string_pretty(&meta)?)
            .map_err(|e| ArtifactError::Sidecar(sidecar.display().to_string(), e))?;

        info!(id, path = %path.display(), "donation image saved");
        Ok(path)
    }

    /// Save the three window frames as evidence. `None` when triplets are disabled.
    pub fn write_triplet(
        &self,
        id: &str,
        frames: &[Frame; 3],
    ) -> Result<Option<PathBuf>, ArtifactError> {
        let Some(dir) = &self.triplets_dir else {
            return Ok(None);
        };
        for (index, frame) in frames.iter().enumerate() {
            write_png(&keys::triplet_frame_path(dir, id, index), frame)?;
        }
        let out = keys::triplet_dir(dir, id);
        debug!(id, dir = %out.display(), "evidence triplet saved");
        Ok(Some(out))
    }

    pub fn write_screenshot(&self, frame: &Frame, wall_ms: i64) -> Result<PathBuf, ArtifactError> {
        let path = keys::screenshot_path(&self.screenshots_dir, wall_ms);
        write_png(&path, frame)?;
        info!(seq = frame.seq, path = %path.display(), "screenshot saved");
        Ok(path)
    }
}

/// Encode a BGR frame as RGB PNG, creating parent directories as needed.
pub fn write_png(path: &Path, frame: &Frame) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ArtifactError::CreateDir(parent.display().to_string(), e))?;
    }
    frame
        .to_rgb_image()
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| ArtifactError::Encode(path.display().to_string(), e))
}
