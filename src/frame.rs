//! Raw frame container and ROI cropping.
//!
//! Frames are produced by the ingest layer and shared with the processing
//! loop as `Arc<Frame>`; they are immutable after construction. Cropping a
//! frame that is smaller than the configured ROI (a stream hiccup can hand
//! over a truncated buffer) is reported as `FrameUnavailable` rather than
//! silently returning a partial crop.

use std::time::Instant;

use image::{GrayImage, RgbImage};

use crate::error::CaptureError;
use crate::Roi;

/// One captured video frame: packed BGR24 samples plus dimensions and the
/// monotonic capture instant.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.data.len() >= (self.width as usize) * (self.height as usize) * 3
    }

    /// Crop to the ROI and convert to single-channel luminance
    /// (ITU-R 601 weights).
    pub fn gray_crop(&self, roi: &Roi) -> Result<GrayImage, CaptureError> {
        if !self.is_complete() || roi.x_right > self.width || roi.y_lower > self.height {
            return Err(CaptureError::FrameUnavailable);
        }

        let mut gray = GrayImage::new(roi.width(), roi.height());
        for (y, row) in gray.rows_mut().enumerate() {
            let src_y = (roi.y_upper as usize + y) * self.width as usize;
            for (x, pixel) in row.enumerate() {
                let i = (src_y + roi.x_left as usize + x) * 3;
                pixel.0 = [luma_bgr(self.data[i], self.data[i + 1], self.data[i + 2])];
            }
        }
        Ok(gray)
    }

    /// Full frame as an `RgbImage` for annotation and JPEG output.
    pub fn to_rgb_image(&self) -> RgbImage {
        let mut rgb = RgbImage::new(self.width, self.height);
        if !self.is_complete() {
            return rgb;
        }
        for (i, pixel) in rgb.pixels_mut().enumerate() {
            let o = i * 3;
            pixel.0 = [self.data[o + 2], self.data[o + 1], self.data[o]];
        }
        rgb
    }
}

fn luma_bgr(b: u8, g: u8, r: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}
