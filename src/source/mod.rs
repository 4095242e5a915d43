mod image_sequence;
mod memory;
#[cfg(all(feature = "video_file", target_os = "linux"))]
mod video_file;

pub use image_sequence::ImageSequenceSource;
pub use memory::MemorySource;
#[cfg(all(feature = "video_file", target_os = "linux"))]
pub use video_file::VideoFileSource;

use crate::error::DetectorError;
use crate::frame::FrameData;
use std::path::Path;
use tracing::info;

/// Stream properties reported when a source is opened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    /// Nominal frame rate
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl SourceInfo {
    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }
}

/// Sequential frame provider for the detector.
///
/// Sources are driven from a blocking worker thread, so every method may
/// block on I/O or decoding.
pub trait FrameSource: Send {
    /// Human readable name used in logs and errors
    fn name(&self) -> &str;

    /// Open the underlying stream. Must be called before `next_frame`.
    fn open(&mut self) -> Result<SourceInfo, DetectorError>;

    /// Next frame in presentation order, or `None` at end of stream
    fn next_frame(&mut self) -> Result<Option<FrameData>, DetectorError>;

    /// Discard up to `count` frames, returning how many were actually skipped
    fn skip(&mut self, count: u64) -> Result<u64, DetectorError> {
        let mut skipped = 0;
        while skipped < count {
            if self.next_frame()?.is_none() {
                break;
            }
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Release the stream. Safe to call more than once.
    fn release(&mut self);
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "webm"];

/// Pick a frame source implementation for a filesystem path.
///
/// Directories are read as numbered image sequences paced at `fps`. Video
/// container files need the `video_file` feature.
pub fn open_source_for_path(path: &Path, fps: f64) -> Result<Box<dyn FrameSource>, DetectorError> {
    if path.is_dir() {
        info!("Using image sequence source at {}", path.display());
        return Ok(Box::new(ImageSequenceSource::new(path, fps)));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        #[cfg(all(feature = "video_file", target_os = "linux"))]
        {
            info!("Using GStreamer video source for {}", path.display());
            return Ok(Box::new(VideoFileSource::new(path)));
        }

        #[cfg(not(all(feature = "video_file", target_os = "linux")))]
        return Err(DetectorError::SourceUnavailable {
            source_name: path.display().to_string(),
            details: "video file playback requires the video_file feature".to_string(),
        });
    }

    Err(DetectorError::SourceUnavailable {
        source_name: path.display().to_string(),
        details: "not an image directory or a supported video file".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_selects_image_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let source = open_source_for_path(dir.path(), 25.0).unwrap();
        assert!(source.name().contains(&dir.path().display().to_string()));
    }

    #[test]
    fn test_unknown_path_is_unavailable() {
        let result = open_source_for_path(Path::new("/nonexistent/capture.txt"), 30.0);
        assert!(matches!(
            result,
            Err(DetectorError::SourceUnavailable { .. })
        ));
    }
}
