use super::state::FrameMetrics;
use crate::error::DetectorError;
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::threshold;
use imageproc::point::Point;

/// Measures the change between two consecutive grayscale frames
#[derive(Debug, Clone)]
pub struct FrameAnalyzer {
    binarization_threshold: u8,
    min_contour_area: f64,
}

impl FrameAnalyzer {
    pub fn new(binarization_threshold: f64, min_contour_area: f64) -> Self {
        // 8-bit thresholds are truncated to the integer below
        let binarization_threshold = binarization_threshold.floor().clamp(0.0, 255.0) as u8;
        Self {
            binarization_threshold,
            min_contour_area,
        }
    }

    pub fn binarization_threshold(&self) -> u8 {
        self.binarization_threshold
    }

    /// Difference mask: pixels whose absolute change exceeds the threshold are 255
    pub fn difference_mask(
        &self,
        previous: &GrayImage,
        current: &GrayImage,
    ) -> Result<GrayImage, DetectorError> {
        if previous.dimensions() != current.dimensions() {
            return Err(DetectorError::FrameProcessing {
                details: format!(
                    "frame size changed from {:?} to {:?}",
                    previous.dimensions(),
                    current.dimensions()
                ),
            });
        }

        let (width, height) = current.dimensions();
        let mut diff_image = GrayImage::new(width, height);
        for (x, y, prev_pixel) in previous.enumerate_pixels() {
            let curr_pixel = current.get_pixel(x, y);
            let diff = (prev_pixel[0] as i16 - curr_pixel[0] as i16).unsigned_abs() as u8;
            diff_image.put_pixel(x, y, Luma([diff]));
        }

        Ok(threshold(&diff_image, self.binarization_threshold))
    }

    /// Count changed pixels and look for a localized region of change
    pub fn measure(
        &self,
        previous: &GrayImage,
        current: &GrayImage,
    ) -> Result<FrameMetrics, DetectorError> {
        let mask = self.difference_mask(previous, current)?;
        let nonzero_pixels = mask.pixels().filter(|p| p[0] != 0).count() as u64;

        let significant_change = nonzero_pixels > 0
            && find_contours::<i32>(&mask)
                .iter()
                .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
                .any(|contour| polygon_area(&contour.points) > self.min_contour_area);

        Ok(FrameMetrics {
            nonzero_pixels,
            significant_change,
        })
    }
}

/// Area enclosed by a closed contour (shoelace formula)
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let mut twice_area: i64 = 0;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice_area.unsigned_abs() as f64 / 2.0
}
