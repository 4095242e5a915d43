use super::{FrameSource, SourceInfo};
use crate::error::DetectorError;
use crate::frame::FrameData;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Frame source reading a directory of still images in file name order
pub struct ImageSequenceSource {
    directory: PathBuf,
    name: String,
    fps: f64,
    files: Vec<PathBuf>,
    position: usize,
    dimensions: Option<(u32, u32)>,
}

impl ImageSequenceSource {
    pub fn new(directory: &Path, fps: f64) -> Self {
        Self {
            directory: directory.to_path_buf(),
            name: directory.display().to_string(),
            fps,
            files: Vec::new(),
            position: 0,
            dimensions: None,
        }
    }

    fn unavailable(&self, details: String) -> DetectorError {
        DetectorError::SourceUnavailable {
            source_name: self.name.clone(),
            details,
        }
    }

    fn load(&self, path: &Path) -> Result<FrameData, DetectorError> {
        let image = image::open(path).map_err(|e| DetectorError::FrameProcessing {
            details: format!("failed to decode {}: {}", path.display(), e),
        })?;
        Ok(FrameData::from_gray(self.position as u64, image.to_luma8()))
    }
}

impl FrameSource for ImageSequenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<SourceInfo, DetectorError> {
        let entries = std::fs::read_dir(&self.directory).map_err(|e| self.unavailable(e.to_string()))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        let first = files
            .first()
            .ok_or_else(|| self.unavailable("directory contains no images".to_string()))?;
        let (width, height) =
            image::image_dimensions(first).map_err(|e| self.unavailable(e.to_string()))?;

        info!(
            "Opened image sequence {} ({} frames, {}x{} @ {}fps)",
            self.name,
            files.len(),
            width,
            height,
            self.fps
        );

        self.files = files;
        self.position = 0;
        self.dimensions = Some((width, height));

        Ok(SourceInfo {
            fps: self.fps,
            width,
            height,
        })
    }

    fn next_frame(&mut self) -> Result<Option<FrameData>, DetectorError> {
        let expected = self.dimensions.ok_or(DetectorError::NotConfigured)?;
        let Some(path) = self.files.get(self.position).cloned() else {
            return Ok(None);
        };

        let frame = self.load(&path)?;
        self.position += 1;

        if (frame.width, frame.height) != expected {
            return Err(DetectorError::FrameProcessing {
                details: format!(
                    "{} is {}x{}, sequence is {}x{}",
                    path.display(),
                    frame.width,
                    frame.height,
                    expected.0,
                    expected.1
                ),
            });
        }

        Ok(Some(frame))
    }

    fn skip(&mut self, count: u64) -> Result<u64, DetectorError> {
        let available = self.files.len().saturating_sub(self.position) as u64;
        let skipped = count.min(available);
        self.position += skipped as usize;
        debug!("Skipped {} frames of {}", skipped, self.name);
        Ok(skipped)
    }

    fn release(&mut self) {
        self.files.clear();
        self.position = 0;
        self.dimensions = None;
    }
}
