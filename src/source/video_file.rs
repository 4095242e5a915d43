use super::{FrameSource, SourceInfo};
use crate::error::DetectorError;
use crate::frame::{FrameData, FrameFormat};
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Decodes a recorded video file into grayscale frames with GStreamer
pub struct VideoFileSource {
    path: PathBuf,
    name: String,
    pipeline: Option<Pipeline>,
    appsink: Option<AppSink>,
    frame_counter: u64,
    /// Preroll sample is the first frame and is handed out before pulling
    pending: Option<gstreamer::Sample>,
}

impl VideoFileSource {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            name: path.display().to_string(),
            pipeline: None,
            appsink: None,
            frame_counter: 0,
            pending: None,
        }
    }

    fn unavailable(&self, details: impl Into<String>) -> DetectorError {
        DetectorError::SourceUnavailable {
            source_name: self.name.clone(),
            details: details.into(),
        }
    }

    fn build_pipeline_string(&self) -> String {
        format!(
            "filesrc location=\"{}\" ! decodebin ! videoconvert ! \
             video/x-raw,format=GRAY8 ! \
             appsink name=sink sync=false max-buffers=4",
            self.path.display()
        )
    }

    fn sample_to_frame(&mut self, sample: &gstreamer::Sample) -> Result<FrameData, DetectorError> {
        let buffer = sample.buffer().ok_or_else(|| DetectorError::FrameProcessing {
            details: "No buffer in sample".to_string(),
        })?;
        let caps = sample.caps().ok_or_else(|| DetectorError::FrameProcessing {
            details: "No caps in sample".to_string(),
        })?;
        let video_info = VideoInfo::from_caps(caps).map_err(|e| DetectorError::FrameProcessing {
            details: format!("Failed to get video info: {}", e),
        })?;

        let width = video_info.width();
        let height = video_info.height();
        let stride = video_info.stride()[0] as usize;

        let map = buffer
            .map_readable()
            .map_err(|e| DetectorError::FrameProcessing {
                details: format!("Failed to map buffer: {}", e),
            })?;

        // Rows may be padded; copy only the visible pixels
        let row = width as usize;
        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            let slice = map
                .as_slice()
                .get(start..start + row)
                .ok_or_else(|| DetectorError::FrameProcessing {
                    details: format!("buffer too short for row {}", y),
                })?;
            data.extend_from_slice(slice);
        }

        let id = self.frame_counter;
        self.frame_counter += 1;
        Ok(FrameData::new(
            id,
            SystemTime::now(),
            data,
            width,
            height,
            FrameFormat::Gray8,
        ))
    }
}

impl FrameSource for VideoFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<SourceInfo, DetectorError> {
        if !self.path.is_file() {
            return Err(self.unavailable("file does not exist"));
        }

        gstreamer::init().map_err(|e| self.unavailable(format!("Failed to initialize GStreamer: {}", e)))?;

        let pipeline_desc = self.build_pipeline_string();
        debug!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| self.unavailable(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| self.unavailable("Failed to downcast to Pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| self.unavailable("Failed to get appsink element"))?
            .downcast::<AppSink>()
            .map_err(|_| self.unavailable("Failed to downcast to AppSink"))?;

        pipeline
            .set_state(gstreamer::State::Paused)
            .map_err(|e| self.unavailable(format!("Failed to preroll pipeline: {}", e)))?;

        let preroll = appsink
            .pull_preroll()
            .map_err(|_| self.unavailable("stream contains no decodable video"))?;

        let caps = preroll
            .caps()
            .ok_or_else(|| self.unavailable("No caps in preroll sample"))?;
        let video_info = VideoInfo::from_caps(caps)
            .map_err(|e| self.unavailable(format!("Failed to get video info: {}", e)))?;

        let fps_fraction = video_info.fps();
        let fps = if fps_fraction.denom() > 0 && fps_fraction.numer() > 0 {
            fps_fraction.numer() as f64 / fps_fraction.denom() as f64
        } else {
            warn!("{} does not declare a frame rate, assuming 30fps", self.name);
            30.0
        };

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| self.unavailable(format!("Failed to start pipeline: {}", e)))?;

        let info = SourceInfo {
            fps,
            width: video_info.width(),
            height: video_info.height(),
        };

        info!(
            "Opened video file {} ({}x{} @ {:.2}fps)",
            self.name, info.width, info.height, info.fps
        );

        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        self.pending = Some(preroll);
        self.frame_counter = 0;

        Ok(info)
    }

    fn next_frame(&mut self) -> Result<Option<FrameData>, DetectorError> {
        if let Some(sample) = self.pending.take() {
            return self.sample_to_frame(&sample).map(Some);
        }

        let appsink = self.appsink.as_ref().ok_or(DetectorError::NotConfigured)?;
        if appsink.is_eos() {
            return Ok(None);
        }

        match appsink.pull_sample() {
            Ok(sample) => self.sample_to_frame(&sample).map(Some),
            // pull_sample only fails at end of stream or when stopped
            Err(_) => Ok(None),
        }
    }

    fn release(&mut self) {
        self.pending = None;
        self.appsink = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                warn!("Failed to stop pipeline for {}: {}", self.name, e);
            }
        }
    }
}

impl Drop for VideoFileSource {
    fn drop(&mut self) {
        self.release();
    }
}
