//! Synthetic camera for tests and demos.
//!
//! Produces a dark scene with one bright block moving left to right at a
//! fixed number of pixels per frame. The block's brightness alternates
//! slightly between frames so that frame differencing registers its whole
//! extent, not just the leading and trailing edges.

use std::time::Duration;

use anyhow::Result;

use super::stream::CameraDevice;
use crate::config::CameraSettings;
use crate::frame::Frame;

const BACKGROUND: u8 = 16;
const OBJECT_WIDTH: u32 = 24;
const OBJECT_HEIGHT: u32 = 16;

pub struct SyntheticCamera {
    settings: CameraSettings,
    step_px: u32,
    frame_count: u64,
}

impl SyntheticCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            step_px: 5,
            frame_count: 0,
        }
    }

    /// Override the per-frame displacement of the moving block.
    pub fn with_step(mut self, step_px: u32) -> Self {
        self.step_px = step_px;
        self
    }

    /// Build the frame for a given frame index without pacing. Used by
    /// tests that drive the pipeline deterministically.
    pub fn frame_at(&self, index: u64) -> Frame {
        let width = self.settings.width;
        let height = self.settings.height;
        let mut data = vec![BACKGROUND; (width * height * 3) as usize];

        let travel = width.saturating_sub(OBJECT_WIDTH).max(1);
        let x0 = ((index as u32).wrapping_mul(self.step_px)) % travel;
        let y0 = height / 2 - OBJECT_HEIGHT / 2;
        // Alternate brightness so the interior of the block changes too.
        let brightness = if index % 2 == 0 { 200 } else { 240 };

        for y in y0..y0 + OBJECT_HEIGHT {
            for x in x0..x0 + OBJECT_WIDTH {
                let i = ((y * width + x) * 3) as usize;
                data[i] = brightness;
                data[i + 1] = brightness;
                data[i + 2] = brightness;
            }
        }
        Frame::new(data, width, height)
    }
}

impl CameraDevice for SyntheticCamera {
    fn grab(&mut self) -> Result<Frame> {
        std::thread::sleep(Duration::from_millis(
            (1000 / self.settings.fps.max(1)) as u64,
        ));
        let frame = self.frame_at(self.frame_count);
        self.frame_count += 1;
        Ok(frame)
    }

    fn describe(&self) -> String {
        format!(
            "{} ({}x{} @ {} fps, synthetic)",
            self.settings.device, self.settings.width, self.settings.height, self.settings.fps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraBackend;

    fn settings() -> CameraSettings {
        CameraSettings {
            backend: CameraBackend::Webcam,
            device: "stub://test".to_string(),
            width: 320,
            height: 240,
            fps: 30,
        }
    }

    #[test]
    fn block_advances_by_step_between_frames() {
        let cam = SyntheticCamera::new(settings()).with_step(10);
        let roi = crate::Roi {
            x_left: 0,
            x_right: 320,
            y_upper: 0,
            y_lower: 240,
        };
        let a = cam.frame_at(0).gray_crop(&roi).unwrap();
        let b = cam.frame_at(1).gray_crop(&roi).unwrap();

        let leftmost_bright = |img: &image::GrayImage| {
            img.enumerate_pixels()
                .filter(|(_, _, p)| p.0[0] > 100)
                .map(|(x, _, _)| x)
                .min()
                .unwrap()
        };
        assert_eq!(leftmost_bright(&b), leftmost_bright(&a) + 10);
    }
}
