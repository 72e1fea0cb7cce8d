//! Motion region selection.

use super::MotionRegion;

/// Pick the single region worth tracking: strictly largest area above
/// `min_area`, bounding box entirely inside the horizontal margin.
///
/// The margin keeps partially-visible objects at the ROI edges from
/// producing truncated boxes. Both bounds are strict: a box touching the
/// margin is excluded. Returns `None` when nothing qualifies, which is
/// the normal no-motion outcome. Pure function.
pub fn select_region(
    regions: &[MotionRegion],
    roi_width: u32,
    min_area: u32,
    margin_px: u32,
) -> Option<MotionRegion> {
    let mut biggest_area = min_area;
    let mut chosen = None;
    for region in regions {
        if region.area > biggest_area
            && region.x > margin_px
            && region.x + region.w < roi_width - margin_px
        {
            biggest_area = region.area;
            chosen = Some(*region);
        }
    }
    chosen
}
