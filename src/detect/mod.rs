//! Frame-differencing motion detection.
//!
//! Two successive luminance crops of the monitored area are differenced,
//! blurred to suppress sensor noise, binarized at a fixed threshold, and
//! the resulting mask is split into connected regions. Each region is
//! reported as a bounding box plus changed-pixel area, in ROI-local
//! coordinates. Detection is a pure function of its two input images.

mod select;

pub use select::select_region;

use std::collections::BTreeMap;

use image::{GrayImage, Luma};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::filter::box_filter;
use imageproc::region_labelling::{connected_components, Connectivity};

/// One connected region of detected pixel change: axis-aligned bounding
/// box plus pixel area, in ROI-local coordinates. Produced fresh each
/// frame, never mutated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub area: u32,
}

pub struct MotionDetector {
    blur_radius: u32,
    threshold_sensitivity: u8,
}

impl MotionDetector {
    pub fn new(blur_size: u32, threshold_sensitivity: u8) -> Self {
        Self {
            // box_filter takes a radius; a kernel of `blur_size` px spans
            // roughly twice its radius.
            blur_radius: (blur_size / 2).max(1),
            threshold_sensitivity,
        }
    }

    /// Motion regions between two same-sized luminance crops.
    pub fn detect(&self, prev: &GrayImage, cur: &GrayImage) -> Vec<MotionRegion> {
        debug_assert_eq!(prev.dimensions(), cur.dimensions());

        let mut diff = GrayImage::new(cur.width(), cur.height());
        for (d, (a, b)) in diff
            .pixels_mut()
            .zip(prev.pixels().zip(cur.pixels()))
        {
            d.0 = [a.0[0].abs_diff(b.0[0])];
        }

        let blurred = box_filter(&diff, self.blur_radius, self.blur_radius);
        let mask = threshold(&blurred, self.threshold_sensitivity, ThresholdType::Binary);
        regions_from_mask(&mask)
    }
}

/// Fold an 8-connected component labelling of the binary mask into
/// bounding boxes with pixel areas. Only outer extents are kept.
fn regions_from_mask(mask: &GrayImage) -> Vec<MotionRegion> {
    #[derive(Clone, Copy)]
    struct Extent {
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
        area: u32,
    }

    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut extents: BTreeMap<u32, Extent> = BTreeMap::new();

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0];
        if label == 0 {
            continue;
        }
        extents
            .entry(label)
            .and_modify(|e| {
                e.min_x = e.min_x.min(x);
                e.min_y = e.min_y.min(y);
                e.max_x = e.max_x.max(x);
                e.max_y = e.max_y.max(y);
                e.area += 1;
            })
            .or_insert(Extent {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                area: 1,
            });
    }

    extents
        .into_values()
        .map(|e| MotionRegion {
            x: e.min_x,
            y: e.min_y,
            w: e.max_x - e.min_x + 1,
            h: e.max_y - e.min_y + 1,
            area: e.area,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([value]))
    }

    fn paint_rect(img: &mut GrayImage, x0: u32, y0: u32, w: u32, h: u32, value: u8) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, Luma([value]));
            }
        }
    }

    #[test]
    fn identical_frames_yield_no_regions() {
        let a = gray(120, 80, 40);
        let detector = MotionDetector::new(10, 20);
        assert!(detector.detect(&a, &a).is_empty());
    }

    #[test]
    fn moving_block_yields_one_region_near_its_box() {
        let prev = gray(120, 80, 16);
        let mut cur = gray(120, 80, 16);
        paint_rect(&mut cur, 40, 30, 20, 12, 230);

        let detector = MotionDetector::new(4, 40);
        let regions = detector.detect(&prev, &cur);
        assert_eq!(regions.len(), 1);

        // Blur smears the box outward by up to the kernel radius.
        let r = regions[0];
        assert!(r.x >= 36 && r.x <= 40, "x = {}", r.x);
        assert!(r.y >= 26 && r.y <= 30, "y = {}", r.y);
        assert!(r.w >= 20 && r.w <= 28, "w = {}", r.w);
        assert!(r.h >= 12 && r.h <= 20, "h = {}", r.h);
        assert!(r.area >= 20 * 12, "area = {}", r.area);
    }

    #[test]
    fn separated_blocks_yield_separate_regions() {
        let prev = gray(200, 80, 16);
        let mut cur = gray(200, 80, 16);
        paint_rect(&mut cur, 10, 10, 16, 16, 230);
        paint_rect(&mut cur, 120, 40, 16, 16, 230);

        let detector = MotionDetector::new(4, 40);
        let regions = detector.detect(&prev, &cur);
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn change_below_threshold_is_ignored() {
        let prev = gray(120, 80, 100);
        let cur = gray(120, 80, 110);
        let detector = MotionDetector::new(4, 40);
        assert!(detector.detect(&prev, &cur).is_empty());
    }
}
