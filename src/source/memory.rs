use super::{FrameSource, SourceInfo};
use crate::error::DetectorError;
use crate::frame::FrameData;
use image::GrayImage;
use std::collections::VecDeque;

/// Frame source backed by a list of in-memory images
pub struct MemorySource {
    name: String,
    info: SourceInfo,
    frames: VecDeque<GrayImage>,
    next_id: u64,
    opened: bool,
    unavailable: bool,
}

impl MemorySource {
    /// Create a source that replays `frames` at the given nominal rate.
    /// Frame dimensions come from the first image.
    pub fn new(frames: Vec<GrayImage>, fps: f64) -> Self {
        let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        Self {
            name: "memory".to_string(),
            info: SourceInfo { fps, width, height },
            frames: frames.into(),
            next_id: 0,
            opened: false,
            unavailable: false,
        }
    }

    /// A source that refuses to open, as a missing camera or file would
    pub fn unavailable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            info: SourceInfo {
                fps: 0.0,
                width: 0,
                height: 0,
            },
            frames: VecDeque::new(),
            next_id: 0,
            opened: false,
            unavailable: true,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<SourceInfo, DetectorError> {
        if self.unavailable {
            return Err(DetectorError::SourceUnavailable {
                source_name: self.name.clone(),
                details: "source cannot be opened".to_string(),
            });
        }
        self.opened = true;
        Ok(self.info)
    }

    fn next_frame(&mut self) -> Result<Option<FrameData>, DetectorError> {
        if !self.opened {
            return Err(DetectorError::NotConfigured);
        }
        Ok(self.frames.pop_front().map(|image| {
            let id = self.next_id;
            self.next_id += 1;
            FrameData::from_gray(id, image)
        }))
    }

    fn release(&mut self) {
        self.opened = false;
    }
}
