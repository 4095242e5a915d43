use crate::error::DetectorError;
use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Pixel layout of a frame handed out by a frame source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// 8-bit luminance, one byte per pixel
    Gray8,
    /// YUV 4:2:2 format - uncompressed YUV data
    Yuyv,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
    /// Compressed JPEG frame
    Mjpeg,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Gray8 => 1,
            FrameFormat::Yuyv => 2,
            FrameFormat::Rgb24 => 3,
            FrameFormat::Mjpeg => 0, // Variable size, compressed
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// One frame of the DUT video stream
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Sequence number within the source, starting at 0
    pub id: u64,
    pub timestamp: SystemTime,
    /// Raw frame bytes (shared so frames can be cloned cheaply)
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl FrameData {
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Wrap an already decoded luminance image
    pub fn from_gray(id: u64, image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(
            id,
            SystemTime::now(),
            image.into_raw(),
            width,
            height,
            FrameFormat::Gray8,
        )
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true,
        }
    }

    /// Decode the frame into a single-channel luminance image
    pub fn to_gray(&self) -> Result<GrayImage, DetectorError> {
        if !self.validate_size() {
            return Err(DetectorError::FrameProcessing {
                details: format!(
                    "frame {} has {} bytes, expected {:?} for {}x{} {:?}",
                    self.id,
                    self.data.len(),
                    self.expected_size(),
                    self.width,
                    self.height,
                    self.format
                ),
            });
        }

        match self.format {
            FrameFormat::Gray8 => GrayImage::from_raw(self.width, self.height, self.data.to_vec())
                .ok_or_else(|| DetectorError::FrameProcessing {
                    details: "Failed to create grayscale image from raw data".to_string(),
                }),
            FrameFormat::Yuyv => Ok(self.yuyv_to_gray()),
            FrameFormat::Rgb24 => self.rgb24_to_gray(),
            FrameFormat::Mjpeg => image::load_from_memory(&self.data)
                .map(|decoded| decoded.to_luma8())
                .map_err(|e| DetectorError::FrameProcessing {
                    details: format!("MJPEG decode failed: {}", e),
                }),
        }
    }

    fn yuyv_to_gray(&self) -> GrayImage {
        let mut gray_image = GrayImage::new(self.width, self.height);

        // YUYV format: Y0 U Y1 V (4 bytes for 2 pixels)
        for y in 0..self.height {
            for x in 0..(self.width / 2) {
                let base_idx = ((y * self.width / 2 + x) * 4) as usize;
                if base_idx + 3 < self.data.len() {
                    gray_image.put_pixel(x * 2, y, Luma([self.data[base_idx]]));
                    gray_image.put_pixel(x * 2 + 1, y, Luma([self.data[base_idx + 2]]));
                }
            }
        }

        gray_image
    }

    fn rgb24_to_gray(&self) -> Result<GrayImage, DetectorError> {
        let rgb_image = RgbImage::from_raw(self.width, self.height, self.data.to_vec())
            .ok_or_else(|| DetectorError::FrameProcessing {
                details: "Failed to create RGB image from raw data".to_string(),
            })?;

        let mut gray_image = GrayImage::new(self.width, self.height);
        for (x, y, rgb) in rgb_image.enumerate_pixels() {
            let gray_value =
                (0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32) as u8;
            gray_image.put_pixel(x, y, Luma([gray_value]));
        }

        Ok(gray_image)
    }
}
