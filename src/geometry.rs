//! Box overlap.

use crate::detect::BoundingBox;

/// Intersection over union of two boxes, in `[0, 1]`.
///
/// Disjoint or edge-touching boxes yield `0.0`; a zero union also yields `0.0`.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let left = a.x1().max(b.x1());
    let top = a.y1().max(b.y1());
    let right = a.x2().min(b.x2());
    let bottom = a.y2().min(b.y2());

    let w = (i64::from(right) - i64::from(left)).max(0);
    let h = (i64::from(bottom) - i64::from(top)).max(0);
    let intersection = i128::from(w) * i128::from(h);
    let union = a.area() + b.area() - intersection;
    if union <= 0 {
        return 0.0;
    }

    (intersection as f64 / union as f64).clamp(0.0, 1.0) as f32
}
