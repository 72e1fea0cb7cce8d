//! Evidence image rendering.
//!
//! Draws the monitored-area outline and the final motion rectangle on the
//! full frame, scales it up for readability, and captions it with the
//! measured speed. In calibration mode the image instead carries hash
//! marks every 10 px along the upper ROI edge so the operator can measure
//! the reference object's pixel length.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::config::SpeedwatchConfig;
use crate::detect::MotionRegion;
use crate::frame::Frame;
use crate::{Roi, SpeedUnit};

const RED: Rgb<u8> = Rgb([255, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

const HASH_MARK_SPACING: u32 = 10;

pub struct Annotator {
    roi: Roi,
    font: Option<FontVec>,
    font_size: u32,
    text_on: bool,
    text_bottom: bool,
    show_motion_area: bool,
    calibrate: bool,
    out_width: u32,
    out_height: u32,
}

impl Annotator {
    pub fn new(cfg: &SpeedwatchConfig) -> Self {
        let font = cfg.image.font_path.as_deref().and_then(load_font);
        if cfg.image.text_on && font.is_none() {
            log::warn!("no usable caption font configured; images will be saved without text");
        }
        let (out_width, out_height) = cfg.image_dimensions();
        Self {
            roi: cfg.roi(),
            font,
            font_size: cfg.image.font_size,
            text_on: cfg.image.text_on,
            text_bottom: cfg.image.text_bottom,
            show_motion_area: cfg.image.show_motion_area,
            calibrate: cfg.calibration.calibrate,
            out_width,
            out_height,
        }
    }

    /// Render the evidence image for one completed track.
    pub fn render(
        &self,
        frame: &Frame,
        region: &MotionRegion,
        ave_speed: f64,
        unit: SpeedUnit,
        image_path: &Path,
    ) -> RgbImage {
        let mut img = frame.to_rgb_image();

        if self.calibrate {
            self.draw_hash_marks(&mut img);
            draw_roi_outline(&mut img, &self.roi, BLUE);
        } else if self.show_motion_area {
            draw_roi_outline(&mut img, &self.roi, RED);
            let rect = Rect::at(
                (self.roi.x_left + region.x) as i32,
                (self.roi.y_upper + region.y) as i32,
            )
            .of_size(region.w.max(1), region.h.max(1));
            draw_hollow_rect_mut(&mut img, rect, GREEN);
        }

        let mut big = image::imageops::resize(
            &img,
            self.out_width,
            self.out_height,
            FilterType::Triangle,
        );

        if self.text_on {
            if let Some(font) = &self.font {
                let caption = format!(
                    "SPEED {:.1} {} - {}",
                    ave_speed,
                    unit,
                    image_path.display()
                );
                let text_y = if self.text_bottom {
                    self.out_height.saturating_sub(50) as i32
                } else {
                    10
                };
                let text_x = (self.out_width as i32 / 2
                    - caption.len() as i32 * self.font_size as i32 / 3)
                    .max(2);
                let scale = PxScale::from(self.font_size as f32 * 2.0);
                draw_text_mut(&mut big, WHITE, text_x, text_y, scale, font, &caption);
            }
        }

        big
    }

    /// Vertical hash marks along the upper ROI edge, one every 10 px, for
    /// reading off `cal_obj_px`.
    fn draw_hash_marks(&self, img: &mut RgbImage) {
        let y_top = self.roi.y_upper.saturating_sub(5) as f32;
        let y_bottom = (self.roi.y_upper + 30).min(img.height() - 1) as f32;
        let mut x = HASH_MARK_SPACING;
        while x + HASH_MARK_SPACING <= img.width() {
            draw_line_segment_mut(img, (x as f32, y_top), (x as f32, y_bottom), RED);
            x += HASH_MARK_SPACING;
        }
    }
}

fn draw_roi_outline(img: &mut RgbImage, roi: &Roi, color: Rgb<u8>) {
    let rect = Rect::at(roi.x_left as i32, roi.y_upper as i32).of_size(roi.width(), roi.height());
    draw_hollow_rect_mut(img, rect, color);
}

fn load_font(path: &Path) -> Option<FontVec> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("failed to read caption font {}: {}", path.display(), e);
            return None;
        }
    };
    match FontVec::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(e) => {
            log::warn!("failed to parse caption font {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpeedwatchConfig;

    fn test_frame(cfg: &SpeedwatchConfig) -> Frame {
        let (w, h) = (cfg.camera.width, cfg.camera.height);
        Frame::new(vec![32u8; (w * h * 3) as usize], w, h)
    }

    #[test]
    fn render_scales_to_configured_output_size() {
        let cfg = SpeedwatchConfig::load_from(None).unwrap();
        let annotator = Annotator::new(&cfg);
        let frame = test_frame(&cfg);
        let region = MotionRegion {
            x: 40,
            y: 20,
            w: 30,
            h: 15,
            area: 450,
        };
        let img = annotator.render(
            &frame,
            &region,
            62.5,
            SpeedUnit::Kph,
            Path::new("media/images/speed-test.jpg"),
        );
        assert_eq!(img.dimensions(), cfg.image_dimensions());
    }

    #[test]
    fn motion_rectangle_is_drawn_in_frame_coordinates() {
        let mut cfg = SpeedwatchConfig::load_from(None).unwrap();
        cfg.image.bigger = 1.0;
        cfg.image.text_on = false;
        let annotator = Annotator::new(&cfg);
        let frame = test_frame(&cfg);
        let region = MotionRegion {
            x: 40,
            y: 20,
            w: 30,
            h: 15,
            area: 450,
        };
        let img = annotator.render(
            &frame,
            &region,
            0.0,
            SpeedUnit::Kph,
            Path::new("x.jpg"),
        );
        // Top edge of the green box: ROI origin + region offset. Resampling
        // at scale 1.0 may blend edge pixels slightly, so check dominance
        // rather than exact color.
        let px = img.get_pixel(cfg.motion.x_left + 40 + 5, cfg.motion.y_upper + 20);
        assert!(px.0[1] > 150 && px.0[0] < 100, "pixel = {:?}", px.0);
    }
}
